//! The expression compiler (component C6).
//!
//! Implemented as methods on [`Compiler`] rather than a separate AST
//! stage: each production compiles directly to instructions and returns
//! the stack offset holding its result, matching the fused
//! parse-and-generate contract the language's design calls for.
//! Precedence, low to high: comparison, additive, multiplicative, power
//! (right-associative), unary minus, primary.

use crate::common::{Error, Id, TacResult};
use crate::front::lex::{Token, TokenKind};
use crate::middle::compiler::Compiler;
use crate::middle::ilist::{Opcode, Operand};
use crate::middle::symtab::SymbolEntry;
use crate::middle::value::{Range, Value};

impl<'src> Compiler<'src> {
    pub(crate) fn compile_expr(&mut self) -> TacResult<isize> {
        self.compile_comparison()
    }

    fn compile_comparison(&mut self) -> TacResult<isize> {
        let mut lhs = self.compile_additive()?;
        loop {
            let tok = self.next_token()?;
            let opcode = match tok.kind {
                TokenKind::Lt => Opcode::Lesser,
                TokenKind::Gt => Opcode::Greater,
                TokenKind::EqEq => Opcode::Eq,
                TokenKind::Leq => Opcode::Leq,
                TokenKind::Geq => Opcode::Geq,
                TokenKind::Neq => Opcode::Neq,
                _ => {
                    self.push_back(tok);
                    return Ok(lhs);
                }
            };
            let line = tok.line;
            let rhs = self.compile_additive()?;
            lhs = self.emit_binary(opcode, lhs, rhs, line);
        }
    }

    fn compile_additive(&mut self) -> TacResult<isize> {
        let mut lhs = self.compile_multiplicative()?;
        loop {
            let tok = self.next_token()?;
            let opcode = match tok.kind {
                TokenKind::Plus => Opcode::Add,
                TokenKind::Minus => Opcode::Sub,
                _ => {
                    self.push_back(tok);
                    return Ok(lhs);
                }
            };
            let line = tok.line;
            let rhs = self.compile_multiplicative()?;
            lhs = self.emit_binary(opcode, lhs, rhs, line);
        }
    }

    fn compile_multiplicative(&mut self) -> TacResult<isize> {
        let mut lhs = self.compile_power()?;
        loop {
            let tok = self.next_token()?;
            let opcode = match tok.kind {
                TokenKind::Star => Opcode::Mul,
                TokenKind::Slash => Opcode::Div,
                _ => {
                    self.push_back(tok);
                    return Ok(lhs);
                }
            };
            let line = tok.line;
            let rhs = self.compile_power()?;
            lhs = self.emit_binary(opcode, lhs, rhs, line);
        }
    }

    /// Right-associative: `2 ^ 3 ^ 2` is `2 ^ (3 ^ 2)`.
    fn compile_power(&mut self) -> TacResult<isize> {
        let lhs = self.compile_unary()?;
        let tok = self.next_token()?;
        if tok.kind != TokenKind::Caret {
            self.push_back(tok);
            return Ok(lhs);
        }
        let line = tok.line;
        let rhs = self.compile_power()?;
        Ok(self.emit_binary(Opcode::Pow, lhs, rhs, line))
    }

    fn compile_unary(&mut self) -> TacResult<isize> {
        let tok = self.next_token()?;
        if tok.kind == TokenKind::Minus {
            let line = tok.line;
            let operand = self.compile_unary()?;
            let zero = self.emit_literal_temp(Value::Number(0.0), line);
            return Ok(self.emit_binary(Opcode::Sub, zero, operand, line));
        }
        self.push_back(tok);
        self.compile_postfix()
    }

    /// A primary expression, followed by zero or more `[from:to]` slices.
    fn compile_postfix(&mut self) -> TacResult<isize> {
        let mut offset = self.compile_primary()?;
        loop {
            let tok = self.next_token()?;
            if tok.kind != TokenKind::SquareBracketLeft {
                self.push_back(tok);
                return Ok(offset);
            }
            let line = tok.line;
            offset = self.compile_slice(offset, line)?;
        }
    }

    fn compile_slice(&mut self, base: isize, line: u32) -> TacResult<isize> {
        let from = if self.peek_kind()? == TokenKind::Colon { None } else { Some(self.compile_expr()?) };
        self.expect_colon()?;
        let to_tok = self.next_token()?;
        let to = if to_tok.kind == TokenKind::SquareBracketRight {
            self.push_back(to_tok);
            None
        } else {
            self.push_back(to_tok);
            Some(self.compile_expr()?)
        };
        let close = self.next_token()?;
        if close.kind != TokenKind::SquareBracketRight {
            return Err(Error::Syntax { line: close.line, message: format!("expected ']', found {}", close.kind) });
        }
        let range_offset = self.emit_literal_temp(Value::Range(Range { from, to }), line);
        let result = self.symtab_mut().declare_temp();
        self.emit(Opcode::Substring, Operand::Offset(result), Operand::Offset(base), Operand::Offset(range_offset), line);
        Ok(result)
    }

    fn expect_colon(&mut self) -> TacResult<()> {
        let tok = self.next_token()?;
        if tok.kind != TokenKind::Colon {
            return Err(Error::Syntax { line: tok.line, message: format!("expected ':', found {}", tok.kind) });
        }
        Ok(())
    }

    fn compile_primary(&mut self) -> TacResult<isize> {
        let tok = self.next_token()?;
        match tok.kind {
            TokenKind::Number => Ok(self.emit_literal_temp(Value::Number(tok.as_number()), tok.line)),
            TokenKind::String => Ok(self.emit_literal_temp(Value::Str(tok.as_string()), tok.line)),
            TokenKind::Logic => Ok(self.emit_literal_temp(Value::Bool(tok.as_bool()), tok.line)),
            TokenKind::Nil => Ok(self.emit_literal_temp(Value::Nil, tok.line)),
            TokenKind::BracketLeft => {
                let inner = self.compile_expr()?;
                let close = self.next_token()?;
                if close.kind != TokenKind::BracketRight {
                    return Err(Error::Syntax { line: close.line, message: format!("expected ')', found {}", close.kind) });
                }
                Ok(inner)
            }
            TokenKind::Identifier => self.compile_identifier_primary(tok),
            _ => Err(Error::Syntax { line: tok.line, message: format!("unexpected token {} in expression", tok.kind) }),
        }
    }

    fn compile_identifier_primary(&mut self, tok: Token<'src>) -> TacResult<isize> {
        let peek = self.next_token()?;
        if peek.kind == TokenKind::BracketLeft {
            self.push_back(peek);
            return self.compile_call(tok);
        }
        self.push_back(peek);

        let id = self.intern(tok.text);
        match self.current_symtab().lookup(id) {
            Some(SymbolEntry::Var(offset)) => Ok(offset),
            _ => {
                if self.functions.contains(id) {
                    Err(Error::SemanticsOther {
                        line: tok.line,
                        message: format!("function '{id}' used where a value was expected"),
                    })
                } else {
                    Err(Error::SemanticsUndefinedVariable { line: tok.line, name: id.to_string() })
                }
            }
        }
    }

    fn emit_binary(&mut self, opcode: Opcode, lhs: isize, rhs: isize, line: u32) -> isize {
        let dst = self.symtab_mut().declare_temp();
        self.emit(
            opcode,
            Operand::Offset(dst),
            Operand::Offset(lhs),
            Operand::Offset(rhs),
            line,
        );
        dst
    }

    // ---- calls ----------------------------------------------------------

    /// Compiles a call to `name` (builtin or user-defined), consuming the
    /// full `(args)` form. Returns the offset holding the result, already
    /// popped off the call protocol's reserved return slot.
    pub(crate) fn compile_call(&mut self, name_tok: Token<'src>) -> TacResult<isize> {
        self.expect_bracket_left()?;
        let line = name_tok.line;

        if name_tok.text == "typeOf" {
            if let Some(offset) = self.try_compile_type_of_function_literal(line)? {
                return Ok(offset);
            }
        }

        let args = self.compile_arg_list()?;
        match name_tok.text {
            "input" => self.finish_fixed_arity_builtin("input", Opcode::Input, 0, &args, line),
            "numeric" => self.finish_fixed_arity_builtin("numeric", Opcode::Numeric, 1, &args, line),
            "print" => self.finish_print_call(&args, line),
            "typeOf" => self.finish_fixed_arity_builtin("typeOf", Opcode::TypeOf, 1, &args, line),
            "len" => self.finish_fixed_arity_builtin("len", Opcode::Len, 1, &args, line),
            "find" => self.finish_fixed_arity_builtin("find", Opcode::Find, 2, &args, line),
            "sort" => self.finish_fixed_arity_builtin("sort", Opcode::Sort, 1, &args, line),
            _ => self.finish_user_call(self.intern(name_tok.text), &args, line),
        }
    }

    fn expect_bracket_left(&mut self) -> TacResult<()> {
        let tok = self.next_token()?;
        if tok.kind != TokenKind::BracketLeft {
            return Err(Error::Syntax { line: tok.line, message: format!("expected '(', found {}", tok.kind) });
        }
        Ok(())
    }

    /// `typeOf`'s one exception to "a function name is not a value":
    /// `typeOf(f)` where `f` names a function (and isn't shadowed by a
    /// local variable of the same name) compiles `f` to a `Function`
    /// literal instead of erroring. Returns `Ok(None)` when the argument
    /// doesn't match that exact shape, leaving the token stream
    /// untouched so the caller falls back to ordinary argument parsing.
    fn try_compile_type_of_function_literal(&mut self, line: u32) -> TacResult<Option<isize>> {
        let t1 = self.next_token()?;
        if t1.kind != TokenKind::Identifier {
            self.push_back(t1);
            return Ok(None);
        }
        let arg_id = self.intern(t1.text);
        let shadowed = matches!(self.current_symtab().lookup(arg_id), Some(SymbolEntry::Var(_)));
        if shadowed || !self.functions.contains(arg_id) {
            self.push_back(t1);
            return Ok(None);
        }
        let t2 = self.next_token()?;
        if t2.kind != TokenKind::BracketRight {
            self.push_back(t2);
            self.push_back(t1);
            return Ok(None);
        }
        let arg_offset = self.emit_literal_temp(Value::Function(arg_id), line);
        Ok(Some(self.finish_fixed_arity_builtin("typeOf", Opcode::TypeOf, 1, &[arg_offset], line)?))
    }

    /// Parses a comma-separated argument list up to and including the
    /// closing `)`.
    fn compile_arg_list(&mut self) -> TacResult<Vec<isize>> {
        let mut args = Vec::new();
        let tok = self.next_token()?;
        if tok.kind == TokenKind::BracketRight {
            return Ok(args);
        }
        self.push_back(tok);
        loop {
            args.push(self.compile_expr()?);
            let sep = self.next_token()?;
            match sep.kind {
                TokenKind::Comma => continue,
                TokenKind::BracketRight => return Ok(args),
                _ => {
                    return Err(Error::Syntax {
                        line: sep.line,
                        message: format!("expected ',' or ')', found {}", sep.kind),
                    })
                }
            }
        }
    }

    fn finish_fixed_arity_builtin(
        &mut self,
        name: &str,
        opcode: Opcode,
        arity: usize,
        args: &[isize],
        line: u32,
    ) -> TacResult<isize> {
        if args.len() != arity {
            return Err(Error::SemanticsOther {
                line,
                message: format!("'{name}' takes {arity} argument(s), got {}", args.len()),
            });
        }
        for &a in args {
            self.emit(Opcode::PushStack, Operand::Offset(a), Operand::None, Operand::None, line);
        }
        self.emit(Opcode::Push, Operand::Literal(Value::Nil), Operand::None, Operand::None, line);
        self.emit(opcode, Operand::None, Operand::None, Operand::None, line);
        let result = self.symtab_mut().declare_temp();
        self.emit(Opcode::Pop, Operand::Offset(result), Operand::None, Operand::None, line);
        Ok(result)
    }

    /// `print` is variadic: every argument is pushed, followed by a
    /// trailing argument count the builtin reads to know how many values
    /// to walk back over.
    fn finish_print_call(&mut self, args: &[isize], line: u32) -> TacResult<isize> {
        for &a in args {
            self.emit(Opcode::PushStack, Operand::Offset(a), Operand::None, Operand::None, line);
        }
        self.emit(
            Opcode::Push,
            Operand::Literal(Value::Number(args.len() as f64)),
            Operand::None,
            Operand::None,
            line,
        );
        self.emit(Opcode::Push, Operand::Literal(Value::Nil), Operand::None, Operand::None, line);
        self.emit(Opcode::Print, Operand::None, Operand::None, Operand::None, line);
        let result = self.symtab_mut().declare_temp();
        self.emit(Opcode::Pop, Operand::Offset(result), Operand::None, Operand::None, line);
        Ok(result)
    }

    fn finish_user_call(&mut self, name: Id, args: &[isize], line: u32) -> TacResult<isize> {
        let param_count = match self.functions.get(name) {
            Some(descriptor) => descriptor.param_count,
            None => return Err(Error::SemanticsUndefinedFunction { line, name: name.to_string() }),
        };
        if args.len() as isize > param_count {
            return Err(Error::SemanticsOther {
                line,
                message: format!("too many arguments to '{name}'"),
            });
        }
        for &a in args {
            self.emit(Opcode::PushStack, Operand::Offset(a), Operand::None, Operand::None, line);
        }
        for _ in args.len()..(param_count as usize) {
            self.emit(Opcode::Push, Operand::Literal(Value::Nil), Operand::None, Operand::None, line);
        }
        self.emit(Opcode::Push, Operand::Literal(Value::Nil), Operand::None, Operand::None, line);
        self.emit(Opcode::Call, Operand::Callee(name), Operand::None, Operand::None, line);
        let result = self.symtab_mut().declare_temp();
        self.emit(Opcode::Pop, Operand::Offset(result), Operand::None, Operand::None, line);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use crate::middle::compiler::compile;
    use crate::middle::ilist::{Opcode, Operand};

    #[test]
    fn arithmetic_uses_precedence_climbing() {
        let program = compile("a = 1 + 2 * 3\n").unwrap();
        let mul_before_add = program
            .instructions
            .iter()
            .position(|(_, i)| i.opcode == Opcode::Mul)
            .unwrap()
            < program.instructions.iter().position(|(_, i)| i.opcode == Opcode::Add).unwrap();
        assert!(mul_before_add);
    }

    #[test]
    fn power_is_right_associative() {
        // 2 ^ 3 ^ 2 should compile the inner (3 ^ 2) before the outer.
        let program = compile("a = 2 ^ 3 ^ 2\n").unwrap();
        let pow_count = program.instructions.iter().filter(|(_, i)| i.opcode == Opcode::Pow).count();
        assert_eq!(pow_count, 2);
    }

    #[test]
    fn undefined_function_call_is_rejected() {
        let err = compile("a = missing(1)\n").unwrap_err();
        assert!(matches!(err, crate::common::Error::SemanticsUndefinedFunction { .. }));
    }

    #[test]
    fn bare_function_name_outside_type_of_is_rejected() {
        let err = compile("function f()\n return 1\n end\na = f\n").unwrap_err();
        assert!(matches!(err, crate::common::Error::SemanticsOther { .. }));
    }

    #[test]
    fn type_of_accepts_a_bare_function_name() {
        let program = compile("function f()\n return 1\n end\na = typeOf(f)\n").unwrap();
        assert!(program.instructions.iter().any(|(_, i)| i.opcode == Opcode::TypeOf));
    }

    #[test]
    fn substring_slice_compiles_to_a_substring_instruction() {
        let program = compile("a = \"hello\"\nb = a[1:3]\n").unwrap();
        assert!(program.instructions.iter().any(|(_, i)| i.opcode == Opcode::Substring));
    }

    #[test]
    fn print_call_pushes_a_trailing_argument_count() {
        let program = compile("print(1, 2, 3)\n").unwrap();
        assert!(program.instructions.iter().any(|(_, i)| i.opcode == Opcode::Print));
    }

    #[test]
    fn too_many_arguments_to_user_function_is_rejected() {
        let err = compile("function f(a)\n return a\n end\nx = f(1, 2)\n").unwrap_err();
        assert!(matches!(err, crate::common::Error::SemanticsOther { .. }));
    }
}
