//! Target definitions for 32-bit x86 and a small AT&T-syntax assembly
//! writer. Instructions are tab-indented, labels are flush left, one
//! statement per line.

/// General-purpose registers visible to the backend. `%eax` is reserved as
/// the scratch and return-value register and is never handed out by the
/// allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
pub enum Gpr {
    #[strum(serialize = "%eax")]
    Eax,
    #[strum(serialize = "%ebx")]
    Ebx,
    #[strum(serialize = "%ecx")]
    Ecx,
    #[strum(serialize = "%edx")]
    Edx,
}

impl Gpr {
    /// Registers the allocator may hand out, in preference order. `%ebx` is
    /// callee-saved; `%ecx` and `%edx` are caller-saved around calls.
    pub const ALLOCATABLE: [Gpr; 3] = [Gpr::Ebx, Gpr::Ecx, Gpr::Edx];
}

/// Where the allocator placed a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    Reg(Gpr),
    /// Routed through a stack slot in the frame
    Spill,
}

pub struct Assembler {
    output: String,
}

impl Assembler {
    pub fn new() -> Self {
        Self {
            output: String::new(),
        }
    }

    pub fn into_output(self) -> String {
        self.output
    }

    fn push_line(&mut self, line: impl AsRef<str>) {
        self.output.push_str(line.as_ref());
        self.output.push('\n');
    }

    /// Writes one tab-indented instruction or directive
    pub fn emit(&mut self, line: impl AsRef<str>) {
        self.output.push('\t');
        self.push_line(line);
    }

    /// Writes an unindented label line
    pub fn label(&mut self, name: impl AsRef<str>) {
        self.output.push_str(name.as_ref());
        self.push_line(":");
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}
