//! The two-pass recursive-descent compiler driver (component C7).
//!
//! Pass 1 walks the token stream looking only for `function name(params)
//! … end` headers, populating the function table with arity information
//! so forward calls resolve regardless of source order. Pass 2 walks the
//! program again, this time emitting instructions and fully elaborating
//! each function's symbol table.

use internment::Intern;

use crate::common::{Error, Id, TacResult};
use crate::front::lex::{Lexer, Token, TokenKind};
use crate::middle::ilist::{Instruction, InstructionList, LabelId, LabelTable, Opcode, Operand};
use crate::middle::symtab::{
    FunctionDescriptor, FunctionTable, SymbolEntry, SymbolTable, MAIN_FUNCTION_NAME, RETVAL_NAME,
};
use crate::middle::value::Value;

/// The fully compiled program handed to the interpreter.
pub struct Program {
    pub instructions: InstructionList,
    pub labels: LabelTable,
    pub functions: FunctionTable,
    pub entry: usize,
}

/// Compiler context. Per the "global mutable state" REDESIGN FLAG, every
/// piece of compile-time state the original kept as process globals
/// (instruction list, function table, temporary/label counters, current
/// line) lives here instead, threaded explicitly through pass 1 and pass
/// 2.
pub struct Compiler<'src> {
    pub(crate) lexer: Lexer<'src>,
    /// A small pushback buffer layered on top of the lexer's own
    /// single-token pushback, giving the statement dispatcher and the
    /// expression compiler as much lookahead as they need.
    pub(crate) pending: Vec<Token<'src>>,
    pub(crate) instructions: InstructionList,
    pub(crate) labels: LabelTable,
    pub(crate) functions: FunctionTable,
    pub(crate) current_function: Id,
    /// Label every `return` in the current function jumps to; bound to
    /// the function's closing `LABEL` once its body is fully compiled.
    pub(crate) current_end_label: LabelId,
}

impl<'src> Compiler<'src> {
    fn new(source: &'src str) -> Self {
        let main_name: Id = Intern::new(MAIN_FUNCTION_NAME.to_string());
        Compiler {
            lexer: Lexer::new(source),
            pending: Vec::new(),
            instructions: InstructionList::new(),
            labels: LabelTable::default(),
            functions: FunctionTable::new(),
            current_function: main_name,
            current_end_label: LabelId(0), // placeholder, replaced before use
        }
    }

    pub(crate) fn intern(&self, text: &str) -> Id {
        Intern::new(text.to_string())
    }

    // ---- token stream -------------------------------------------------

    pub(crate) fn next_token(&mut self) -> TacResult<Token<'src>> {
        match self.pending.pop() {
            Some(tok) => Ok(tok),
            None => self.lexer.next(),
        }
    }

    pub(crate) fn push_back(&mut self, token: Token<'src>) {
        self.pending.push(token);
    }

    pub(crate) fn peek_kind(&mut self) -> TacResult<TokenKind> {
        let tok = self.next_token()?;
        let kind = tok.kind;
        self.push_back(tok);
        Ok(kind)
    }

    fn expect(&mut self, kind: TokenKind) -> TacResult<Token<'src>> {
        let tok = self.next_token()?;
        if tok.kind != kind {
            return Err(Error::Syntax {
                line: tok.line,
                message: format!("expected {kind}, found {}", tok.kind),
            });
        }
        Ok(tok)
    }

    fn skip_eols(&mut self) -> TacResult<()> {
        loop {
            let tok = self.next_token()?;
            if tok.kind != TokenKind::Eol {
                self.push_back(tok);
                return Ok(());
            }
        }
    }

    // ---- shared emission helpers ---------------------------------------

    pub(crate) fn emit(&mut self, opcode: Opcode, op1: Operand, op2: Operand, op3: Operand, line: u32) -> usize {
        self.instructions.insert_last(Instruction::new(opcode, op1, op2, op3, line))
    }

    pub(crate) fn new_label(&mut self) -> LabelId {
        self.labels.new_label()
    }

    pub(crate) fn bind_label_here(&mut self, label: LabelId, line: u32) -> usize {
        let addr = self.emit(Opcode::Label, Operand::None, Operand::None, Operand::None, line);
        self.labels.bind(label, addr);
        addr
    }

    pub(crate) fn current_symtab(&self) -> &SymbolTable {
        &self.functions.get(self.current_function).expect("current function registered").symtab
    }

    pub(crate) fn symtab_mut(&mut self) -> &mut SymbolTable {
        &mut self
            .functions
            .get_mut(self.current_function)
            .expect("current function registered")
            .symtab
    }

    /// Materializes a literal into a fresh temporary and returns its
    /// offset.
    pub(crate) fn emit_literal_temp(&mut self, value: Value, line: u32) -> isize {
        let offset = self.symtab_mut().declare_temp();
        self.emit(Opcode::Mov, Operand::Offset(offset), Operand::Literal(value), Operand::None, line);
        offset
    }

    // ---- pass 1: function headers --------------------------------------

    fn pass1(&mut self, source: &'src str) -> TacResult<()> {
        let mut lexer = Lexer::new(source);
        loop {
            let tok = lexer.next()?;
            match tok.kind {
                TokenKind::Eof => break,
                TokenKind::Function => {
                    let name_tok = Self::expect_in(&mut lexer, TokenKind::Identifier)?;
                    let name = self.intern(name_tok.text);
                    if self.functions.contains(name) {
                        return Err(Error::SemanticsOther {
                            line: name_tok.line,
                            message: format!("function '{name}' is already defined"),
                        });
                    }
                    Self::expect_in(&mut lexer, TokenKind::BracketLeft)?;
                    let param_count = Self::skip_param_list(&mut lexer)?;
                    self.functions.insert(FunctionDescriptor::new(name, param_count as isize));
                    Self::skip_block(&mut lexer)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn expect_in(lexer: &mut Lexer<'src>, kind: TokenKind) -> TacResult<Token<'src>> {
        let tok = lexer.next()?;
        if tok.kind != kind {
            return Err(Error::Syntax {
                line: tok.line,
                message: format!("expected {kind}, found {}", tok.kind),
            });
        }
        Ok(tok)
    }

    /// Consumes a parenthesized parameter-name list up to and including
    /// the closing `)`, returning the parameter count.
    fn skip_param_list(lexer: &mut Lexer<'src>) -> TacResult<usize> {
        let mut count = 0usize;
        let first = lexer.next()?;
        if first.kind == TokenKind::BracketRight {
            return Ok(0);
        }
        let mut tok = first;
        loop {
            if tok.kind != TokenKind::Identifier {
                return Err(Error::Syntax { line: tok.line, message: "expected parameter name".into() });
            }
            count += 1;
            let sep = lexer.next()?;
            match sep.kind {
                TokenKind::Comma => tok = lexer.next()?,
                TokenKind::BracketRight => break,
                _ => {
                    return Err(Error::Syntax {
                        line: sep.line,
                        message: format!("expected ',' or ')', found {}", sep.kind),
                    })
                }
            }
        }
        Ok(count)
    }

    /// Skips a function body given that one block (the function's own) is
    /// already open; tracks nested `if`/`while` so their `end`s don't get
    /// mistaken for the function's own.
    fn skip_block(lexer: &mut Lexer<'src>) -> TacResult<()> {
        let mut depth = 1i32;
        while depth > 0 {
            let tok = lexer.next()?;
            match tok.kind {
                TokenKind::If | TokenKind::While | TokenKind::Function => depth += 1,
                TokenKind::End => depth -= 1,
                TokenKind::Eof => {
                    return Err(Error::Syntax { line: tok.line, message: "expected 'end'".into() })
                }
                _ => {}
            }
        }
        Ok(())
    }

    // ---- pass 2: code generation ---------------------------------------

    fn pass2(&mut self) -> TacResult<()> {
        let main_name = self.current_function;
        self.functions.insert(FunctionDescriptor::new(main_name, -1));
        self.current_end_label = self.new_label();

        let entry = self.emit(Opcode::Label, Operand::None, Operand::None, Operand::None, 0);
        self.functions.get_mut(main_name).unwrap().first_instruction = Some(entry);

        loop {
            self.skip_eols()?;
            let tok = self.next_token()?;
            match tok.kind {
                TokenKind::Eof => {
                    self.push_back(tok);
                    break;
                }
                TokenKind::Function => {
                    self.push_back(tok);
                    self.compile_function_def()?;
                }
                _ => {
                    self.push_back(tok);
                    self.compile_statement()?;
                }
            }
        }

        let end_label = self.current_end_label;
        let last = self.bind_label_here(end_label, self.lexer.line());
        self.emit(Opcode::Halt, Operand::None, Operand::None, Operand::None, self.lexer.line());
        self.functions.get_mut(main_name).unwrap().last_instruction = Some(last);
        Ok(())
    }

    fn compile_function_def(&mut self) -> TacResult<()> {
        let fn_tok = self.expect(TokenKind::Function)?;
        let name_tok = self.expect(TokenKind::Identifier)?;
        let name = self.intern(name_tok.text);
        let param_count = self
            .functions
            .get(name)
            .ok_or_else(|| Error::Internal(format!("function '{name}' missing from pass 1 table")))?
            .param_count;

        let l_skip = self.new_label();
        self.emit(Opcode::Goto, Operand::Label(l_skip), Operand::None, Operand::None, fn_tok.line);

        let first = self.emit(Opcode::Label, Operand::None, Operand::None, Operand::None, fn_tok.line);
        self.functions.get_mut(name).unwrap().first_instruction = Some(first);

        self.expect(TokenKind::BracketLeft)?;
        if self.peek_kind()? != TokenKind::BracketRight {
            let p = param_count as isize;
            let mut idx = 0isize;
            loop {
                let ptok = self.expect(TokenKind::Identifier)?;
                let pid = self.intern(ptok.text);
                let offset = -(p + 2) + idx;
                self.functions.get_mut(name).unwrap().symtab.insert_var_at(pid, offset);
                idx += 1;
                let sep = self.next_token()?;
                match sep.kind {
                    TokenKind::Comma => continue,
                    TokenKind::BracketRight => {
                        self.push_back(sep);
                        break;
                    }
                    _ => {
                        return Err(Error::Syntax {
                            line: sep.line,
                            message: format!("expected ',' or ')', found {}", sep.kind),
                        })
                    }
                }
            }
        }
        self.expect(TokenKind::BracketRight)?;
        let retval_id = self.intern(RETVAL_NAME);
        self.functions.get_mut(name).unwrap().symtab.insert_var_at(retval_id, -2);

        let saved_function = self.current_function;
        let saved_end_label = self.current_end_label;
        self.current_function = name;
        self.current_end_label = self.new_label();

        self.compile_statement_list(&[TokenKind::End])?;
        let end_tok = self.expect(TokenKind::End)?;

        let end_label = self.current_end_label;
        let last = self.bind_label_here(end_label, end_tok.line);
        self.functions.get_mut(name).unwrap().last_instruction = Some(last);
        self.emit(Opcode::Ret, Operand::ParamCount(param_count as usize), Operand::None, Operand::None, end_tok.line);
        self.bind_label_here(l_skip, end_tok.line);

        self.current_function = saved_function;
        self.current_end_label = saved_end_label;
        Ok(())
    }

    fn compile_statement_list(&mut self, terminators: &[TokenKind]) -> TacResult<()> {
        loop {
            self.skip_eols()?;
            let tok = self.next_token()?;
            if tok.kind == TokenKind::Eof || terminators.contains(&tok.kind) {
                self.push_back(tok);
                return Ok(());
            }
            self.push_back(tok);
            self.compile_statement()?;
        }
    }

    fn compile_statement(&mut self) -> TacResult<()> {
        let tok = self.next_token()?;
        match tok.kind {
            TokenKind::If => {
                self.push_back(tok);
                self.compile_if()
            }
            TokenKind::While => {
                self.push_back(tok);
                self.compile_while()
            }
            TokenKind::Return => {
                self.push_back(tok);
                self.compile_return()
            }
            TokenKind::Identifier => {
                let t2 = self.next_token()?;
                match t2.kind {
                    TokenKind::Assign => {
                        self.push_back(t2);
                        self.compile_assignment(tok)
                    }
                    TokenKind::BracketLeft => {
                        self.push_back(t2);
                        self.compile_call(tok).map(|_| ())
                    }
                    _ => Err(Error::Syntax {
                        line: t2.line,
                        message: format!("expected '=' or '(' after identifier, found {}", t2.kind),
                    }),
                }
            }
            _ => Err(Error::Syntax { line: tok.line, message: format!("unexpected token {}", tok.kind) }),
        }
    }

    fn compile_assignment(&mut self, id_tok: Token<'src>) -> TacResult<()> {
        self.expect(TokenKind::Assign)?;
        let rhs = self.compile_expr()?;
        let id = self.intern(id_tok.text);
        let offset = match self.current_symtab().lookup(id) {
            Some(SymbolEntry::Var(off)) => off,
            _ => self.symtab_mut().declare_local(id),
        };
        self.emit(Opcode::MovStack, Operand::Offset(offset), Operand::Offset(rhs), Operand::None, id_tok.line);
        Ok(())
    }

    fn compile_if(&mut self) -> TacResult<()> {
        let if_tok = self.expect(TokenKind::If)?;
        let cond = self.compile_expr()?;
        let l_else = self.new_label();
        self.emit(Opcode::IfGoto, Operand::Label(l_else), Operand::Offset(cond), Operand::None, if_tok.line);
        self.compile_statement_list(&[TokenKind::Else, TokenKind::End])?;
        let l_end = self.new_label();
        self.emit(Opcode::Goto, Operand::Label(l_end), Operand::None, Operand::None, if_tok.line);
        self.bind_label_here(l_else, if_tok.line);

        let tok = self.next_token()?;
        match tok.kind {
            TokenKind::Else => {
                self.compile_statement_list(&[TokenKind::End])?;
                self.expect(TokenKind::End)?;
            }
            TokenKind::End => {}
            _ => return Err(Error::Syntax { line: tok.line, message: format!("expected 'else' or 'end', found {}", tok.kind) }),
        }
        self.bind_label_here(l_end, if_tok.line);
        Ok(())
    }

    fn compile_while(&mut self) -> TacResult<()> {
        let while_tok = self.expect(TokenKind::While)?;
        let l_cond = self.new_label();
        self.bind_label_here(l_cond, while_tok.line);
        let cond = self.compile_expr()?;
        let l_end = self.new_label();
        self.emit(Opcode::IfGoto, Operand::Label(l_end), Operand::Offset(cond), Operand::None, while_tok.line);
        self.compile_statement_list(&[TokenKind::End])?;
        self.expect(TokenKind::End)?;
        self.emit(Opcode::Goto, Operand::Label(l_cond), Operand::None, Operand::None, while_tok.line);
        self.bind_label_here(l_end, while_tok.line);
        Ok(())
    }

    fn compile_return(&mut self) -> TacResult<()> {
        let return_tok = self.expect(TokenKind::Return)?;
        let r = self.compile_expr()?;
        let main_name: Id = self.intern(MAIN_FUNCTION_NAME);
        if self.current_function != main_name {
            self.emit(Opcode::MovStack, Operand::Offset(-2), Operand::Offset(r), Operand::None, return_tok.line);
        }
        self.emit(Opcode::Goto, Operand::Label(self.current_end_label), Operand::None, Operand::None, return_tok.line);
        Ok(())
    }

    fn into_program(self) -> Program {
        let entry = self
            .functions
            .get(self.current_function)
            .and_then(|f| f.first_instruction)
            .unwrap_or(0);
        Program { instructions: self.instructions, labels: self.labels, functions: self.functions, entry }
    }
}

/// Compiles `source` into a [`Program`] ready for the interpreter.
pub fn compile(source: &str) -> TacResult<Program> {
    let mut compiler = Compiler::new(source);
    compiler.pass1(source)?;
    compiler.pass2()?;
    Ok(compiler.into_program())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_trivial_program_to_a_halt() {
        let program = compile("a = 1\n").unwrap();
        assert!(program.instructions.len() > 0);
        assert!(matches!(program.instructions.get(program.instructions.len() - 1).unwrap().opcode, Opcode::Halt));
    }

    #[test]
    fn duplicate_function_definition_is_rejected() {
        let err = compile("function f() return 1 end\nfunction f() return 2 end\n").unwrap_err();
        assert!(matches!(err, Error::SemanticsOther { .. }));
    }

    #[test]
    fn calling_undefined_function_is_rejected() {
        let err = compile("x = g()\n").unwrap_err();
        assert!(matches!(err, Error::SemanticsUndefinedFunction { .. }));
    }

    #[test]
    fn all_labels_are_bound_after_compiling_control_flow() {
        let program = compile("if 1\n a = 1\n else\n a = 2\n end\nwhile 0\n a = 1\n end\n").unwrap();
        assert!(program.labels.all_bound());
    }

    #[test]
    fn forward_reference_to_a_later_function_resolves() {
        let program = compile("function main_helper()\n return f()\n end\nfunction f()\n return 1\n end\n").unwrap();
        assert!(program.functions.contains(Intern::new("f".to_string())));
    }
}
