//! Reader for the textual IR dialect the MiniC frontend produces: `i32`
//! functions of at most one parameter, entry-block `alloca` slots, and the
//! closed opcode set of the optimizer. Anything outside that subset is a
//! parse error naming the offending line.

use std::str::FromStr;

use hashbrown::HashMap;

use crate::ir::{
    Block, BlockId, Callee, ConstInt, Declaration, Function, InstId, Module, Opcode, Operand,
    Predicate,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

fn error<T>(line: usize, message: impl Into<String>) -> Result<T, ParseError> {
    Err(ParseError {
        line,
        message: message.into(),
    })
}

/// Splits one line into tokens. Sigiled identifiers (`%5`, `@print`) stay a
/// single token; punctuation is one token per character; a `;` comment runs
/// to the end of the line.
fn tokenize(line: &str) -> Vec<&str> {
    let line = match line.find(';') {
        Some(at) => &line[..at],
        None => line,
    };

    let mut tokens = Vec::new();
    let bytes = line.as_bytes();
    let mut i = 0;

    let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_' || b == b'.';

    while i < bytes.len() {
        match bytes[i] {
            b' ' | b'\t' => i += 1,
            b'(' | b')' | b',' | b'=' | b'*' | b':' | b'{' | b'}' => {
                tokens.push(&line[i..i + 1]);
                i += 1;
            }
            b'%' | b'@' => {
                let start = i;
                i += 1;
                while i < bytes.len() && is_word(bytes[i]) {
                    i += 1;
                }
                tokens.push(&line[start..i]);
            }
            b'-' => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                tokens.push(&line[start..i]);
            }
            b if is_word(b) => {
                let start = i;
                while i < bytes.len() && is_word(bytes[i]) {
                    i += 1;
                }
                tokens.push(&line[start..i]);
            }
            _ => {
                tokens.push(&line[i..i + 1]);
                i += 1;
            }
        }
    }

    tokens
}

/// A cursor over one line's tokens
struct Cursor<'a> {
    tokens: Vec<&'a str>,
    pos: usize,
    line: usize,
}

impl<'a> Cursor<'a> {
    fn new(line_no: usize, line: &'a str) -> Self {
        Self {
            tokens: tokenize(line),
            pos: 0,
            line: line_no,
        }
    }

    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Result<&'a str, ParseError> {
        match self.tokens.get(self.pos) {
            Some(token) => {
                self.pos += 1;
                Ok(token)
            }
            None => error(self.line, "unexpected end of line"),
        }
    }

    fn expect(&mut self, token: &str) -> Result<(), ParseError> {
        let found = self.next()?;
        if found == token {
            Ok(())
        } else {
            error(self.line, format!("expected `{token}`, found `{found}`"))
        }
    }

    fn accept(&mut self, token: &str) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }
}

/// Parses a whole module. `fallback_name` is recorded as the module's source
/// name when the text carries no `source_filename` header.
pub fn parse_module(source: &str, fallback_name: &str) -> Result<Module, ParseError> {
    let mut module = Module {
        source_name: fallback_name.to_owned(),
        declarations: Vec::new(),
        functions: Vec::new(),
    };

    let mut lines = source.lines().enumerate().peekable();

    while let Some((index, raw)) = lines.next() {
        let line_no = index + 1;
        let line = raw.trim();

        if line.is_empty() || line.starts_with(';') {
            continue;
        }

        if let Some(rest) = line.strip_prefix("source_filename") {
            if let Some(name) = rest.trim().strip_prefix('=') {
                module.source_name = name.trim().trim_matches('"').to_owned();
            }
            continue;
        }

        if line.starts_with("target") {
            continue;
        }

        let mut cursor = Cursor::new(line_no, line);
        match cursor.next()? {
            "declare" => module.declarations.push(parse_declaration(&mut cursor)?),
            "define" => {
                // Collect the body up to the closing brace, then parse it in
                // two passes so forward branch targets resolve.
                let mut body = Vec::new();
                loop {
                    let Some((body_index, body_raw)) = lines.next() else {
                        return error(line_no, "unterminated function body");
                    };
                    if body_raw.trim() == "}" {
                        break;
                    }
                    body.push((body_index + 1, body_raw));
                }

                module
                    .functions
                    .push(parse_function(&mut cursor, &body)?);
            }
            other => return error(line_no, format!("unexpected token `{other}`")),
        }
    }

    Ok(module)
}

fn parse_declaration(cursor: &mut Cursor) -> Result<Declaration, ParseError> {
    let returns_value = match cursor.next()? {
        "void" => false,
        "i32" => true,
        other => return error(cursor.line, format!("unsupported declared type `{other}`")),
    };

    let name = parse_global_name(cursor)?;

    // Parameter list is recorded only for shape; the callee is resolved by
    // name at call sites.
    cursor.expect("(")?;
    if !cursor.accept(")") {
        cursor.expect("i32")?;
        cursor.expect(")")?;
    }

    Ok(Declaration {
        name,
        returns_value,
    })
}

fn parse_global_name(cursor: &mut Cursor) -> Result<String, ParseError> {
    let token = cursor.next()?;
    match token.strip_prefix('@') {
        Some(name) if !name.is_empty() => Ok(name.to_owned()),
        _ => error(cursor.line, format!("expected `@name`, found `{token}`")),
    }
}

struct FunctionParser<'a> {
    function: Function,
    /// Label token (without the sigil) to block
    labels: HashMap<&'a str, BlockId>,
    /// Defined value token (without the sigil) to instruction
    values: HashMap<&'a str, InstId>,
    /// The formal parameter's token, when the function has one
    param: Option<&'a str>,
}

fn parse_function(
    header: &mut Cursor,
    body: &[(usize, &str)],
) -> Result<Function, ParseError> {
    header.accept("dso_local");
    header.expect("i32")?;
    let name = parse_global_name(header)?;

    header.expect("(")?;
    let param = if header.accept(")") {
        None
    } else {
        header.expect("i32")?;
        let token = header.next()?;
        let Some(token) = token.strip_prefix('%') else {
            return error(header.line, format!("expected parameter name, found `{token}`"));
        };
        header.expect(")")?;
        Some(token)
    };
    header.expect("{")?;

    let mut parser = FunctionParser {
        function: Function::new(name, param.is_some()),
        labels: HashMap::new(),
        values: HashMap::new(),
        param,
    };

    // First pass: lay out the blocks so branches can refer to any label.
    // The entry block is implicit and, the LLVM way, owns the first unnamed
    // number after the parameters.
    let entry = parser.function.blocks.push(Block::default());
    let entry_label = if param.is_some() { "1" } else { "0" };
    parser.labels.insert(entry_label, entry);

    let mut grouped: Vec<(BlockId, Vec<(usize, &str)>)> = vec![(entry, Vec::new())];

    for &(line_no, raw) in body {
        let line = raw.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }

        if let Some(label) = label_of(line) {
            let block = parser.function.blocks.push(Block::default());
            if parser.labels.insert(label, block).is_some() {
                return error(line_no, format!("duplicate block label `{label}`"));
            }
            grouped.push((block, Vec::new()));
        } else {
            grouped.last_mut().unwrap().1.push((line_no, line));
        }
    }

    // Second pass: parse the instructions of each block in order
    for (block, lines) in &grouped {
        for &(line_no, line) in lines {
            if let Some(term) = parser.function.blocks[*block].terminator() {
                if parser.function.inst(term).is_terminator() {
                    return error(line_no, "instruction after block terminator");
                }
            }
            parser.parse_instruction(*block, line_no, line)?;
        }
    }

    for (block, lines) in &grouped {
        let terminated = parser.function.blocks[*block]
            .terminator()
            .is_some_and(|term| parser.function.inst(term).is_terminator());
        if !terminated {
            let line = lines.last().map(|&(n, _)| n).unwrap_or(header.line);
            return error(line, "block does not end with a terminator");
        }
    }

    Ok(parser.function)
}

/// Recognizes a block label line such as `7:` or `exit:`
fn label_of(line: &str) -> Option<&str> {
    let tokens = tokenize(line);
    match tokens.as_slice() {
        [label, ":", ..] if !label.starts_with('%') => Some(label),
        _ => None,
    }
}

impl<'a> FunctionParser<'a> {
    fn parse_instruction(
        &mut self,
        block: BlockId,
        line_no: usize,
        line: &'a str,
    ) -> Result<(), ParseError> {
        let mut cursor = Cursor::new(line_no, line);

        // `%r = <opcode> ...` for instructions producing a result
        let mut result = None;
        if let Some(token) = cursor.peek() {
            if let Some(name) = token.strip_prefix('%') {
                cursor.next()?;
                cursor.expect("=")?;
                result = Some(name);
            }
        }

        let opcode_token = cursor.next()?;
        let opcode = Opcode::from_str(opcode_token)
            .map_err(|_| ParseError {
                line: line_no,
                message: format!("unsupported instruction `{opcode_token}`"),
            })?;

        let mut predicate = None;
        let mut callee = None;

        let operands = match opcode {
            Opcode::Alloca => {
                cursor.expect("i32")?;
                self.skip_align(&mut cursor)?;
                vec![]
            }
            Opcode::Load => {
                cursor.expect("i32")?;
                cursor.expect(",")?;
                let pointer = self.parse_pointer(&mut cursor)?;
                self.skip_align(&mut cursor)?;
                vec![pointer]
            }
            Opcode::Store => {
                cursor.expect("i32")?;
                let value = self.parse_value(&mut cursor)?;
                cursor.expect(",")?;
                let pointer = self.parse_pointer(&mut cursor)?;
                self.skip_align(&mut cursor)?;
                vec![value, pointer]
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul => {
                cursor.accept("nsw");
                cursor.expect("i32")?;
                let lhs = self.parse_value(&mut cursor)?;
                cursor.expect(",")?;
                let rhs = self.parse_value(&mut cursor)?;
                vec![lhs, rhs]
            }
            Opcode::Icmp => {
                let pred_token = cursor.next()?;
                predicate = Some(Predicate::from_str(pred_token).map_err(|_| ParseError {
                    line: line_no,
                    message: format!("unsupported comparison predicate `{pred_token}`"),
                })?);
                cursor.expect("i32")?;
                let lhs = self.parse_value(&mut cursor)?;
                cursor.expect(",")?;
                let rhs = self.parse_value(&mut cursor)?;
                vec![lhs, rhs]
            }
            Opcode::Br => {
                if cursor.accept("label") {
                    vec![Operand::Block(self.parse_label(&mut cursor)?)]
                } else {
                    cursor.expect("i1")?;
                    let condition = self.parse_value(&mut cursor)?;
                    cursor.expect(",")?;
                    cursor.expect("label")?;
                    let true_target = self.parse_label(&mut cursor)?;
                    cursor.expect(",")?;
                    cursor.expect("label")?;
                    let false_target = self.parse_label(&mut cursor)?;
                    // Stored operand order is (condition, false, true)
                    vec![
                        condition,
                        Operand::Block(false_target),
                        Operand::Block(true_target),
                    ]
                }
            }
            Opcode::Ret => {
                cursor.expect("i32")?;
                vec![self.parse_value(&mut cursor)?]
            }
            Opcode::Call => {
                let returns_value = match cursor.next()? {
                    "void" => false,
                    "i32" => true,
                    other => {
                        return error(line_no, format!("unsupported call type `{other}`"))
                    }
                };
                let name = parse_global_name(&mut cursor)?;
                callee = Some(Callee {
                    name,
                    returns_value,
                });

                cursor.expect("(")?;
                let mut args = Vec::new();
                if !cursor.accept(")") {
                    cursor.expect("i32")?;
                    args.push(self.parse_value(&mut cursor)?);
                    cursor.expect(")")?;
                }
                args
            }
        };

        if !cursor.at_end() {
            return error(
                line_no,
                format!("trailing tokens after `{opcode_token}` instruction"),
            );
        }

        let id = self
            .function
            .push_inst(block, opcode, predicate, callee, operands);

        match result {
            Some(name) => {
                if !self.function.inst(id).has_result() {
                    return error(line_no, format!("`{opcode_token}` does not produce a result"));
                }
                if self.values.insert(name, id).is_some() {
                    return error(line_no, format!("value `%{name}` defined twice"));
                }
            }
            None => {
                if self.function.inst(id).has_result() {
                    return error(line_no, format!("result of `{opcode_token}` must be named"));
                }
            }
        }

        Ok(())
    }

    fn parse_value(&self, cursor: &mut Cursor) -> Result<Operand, ParseError> {
        let token = cursor.next()?;

        if let Some(name) = token.strip_prefix('%') {
            if self.param == Some(name) {
                return Ok(Operand::Param);
            }
            return match self.values.get(name) {
                Some(&id) => Ok(Operand::Inst(id)),
                None => error(cursor.line, format!("use of undefined value `%{name}`")),
            };
        }

        match token {
            "true" => Ok(Operand::Const(ConstInt::i1(true))),
            "false" => Ok(Operand::Const(ConstInt::i1(false))),
            _ => match token.parse::<i32>() {
                Ok(value) => Ok(Operand::Const(ConstInt::i32(value))),
                Err(_) => error(cursor.line, format!("expected a value, found `{token}`")),
            },
        }
    }

    /// Parses `i32* %p` (or the opaque `ptr %p`), requiring the operand to
    /// address a slot created by `alloca`.
    fn parse_pointer(&self, cursor: &mut Cursor) -> Result<Operand, ParseError> {
        if !cursor.accept("ptr") {
            cursor.expect("i32")?;
            cursor.expect("*")?;
        }

        let operand = self.parse_value(cursor)?;
        match operand.as_inst() {
            Some(id) if self.function.inst(id).opcode == Opcode::Alloca => Ok(operand),
            _ => error(cursor.line, "pointer operand does not address a slot"),
        }
    }

    fn parse_label(&self, cursor: &mut Cursor) -> Result<BlockId, ParseError> {
        let token = cursor.next()?;
        let Some(name) = token.strip_prefix('%') else {
            return error(cursor.line, format!("expected a label, found `{token}`"));
        };
        match self.labels.get(name) {
            Some(&block) => Ok(block),
            None => error(cursor.line, format!("branch to unknown block `%{name}`")),
        }
    }

    fn skip_align(&self, cursor: &mut Cursor) -> Result<(), ParseError> {
        if cursor.accept(",") {
            cursor.expect("align")?;
            cursor.next()?;
        }
        Ok(())
    }
}
