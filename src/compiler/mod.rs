use crate::lexer::{Token, TokenKind};
use crate::vm::{Inst, Reg, Word};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("expected {expected}, found {found}")]
    UnexpectedTokenKind { expected: &'static str, found: &'static str },
    #[error("unknown function: {name}")]
    UnknownFunction { name: String },
    #[error("function {name} expects {expected} argument(s), found {found}")]
    ArityMismatch { name: String, expected: u8, found: u8 },
    #[error("no enclosing lexical context")]
    MalformedContext,
}

type Result<T> = std::result::Result<T, CompileError>;

// ── Binding powers ──────────────────────────────────────────────────

const BP_NONE: u8 = 0;

/// Infix and prefix binding powers per operator kind. Only unary minus has a
/// prefix power.
#[derive(Debug, Clone, Copy)]
struct Bp {
    pre: u8,
    infix: u8,
}

fn binding_power(kind: TokenKind) -> Bp {
    match kind {
        TokenKind::EqualEqual | TokenKind::BangEqual => Bp { pre: BP_NONE, infix: 1 },
        TokenKind::Gt | TokenKind::Lt => Bp { pre: BP_NONE, infix: 2 },
        TokenKind::Plus => Bp { pre: BP_NONE, infix: 3 },
        TokenKind::Minus => Bp { pre: 7, infix: 4 },
        TokenKind::Mult => Bp { pre: BP_NONE, infix: 5 },
        TokenKind::Div => Bp { pre: BP_NONE, infix: 6 },
        _ => Bp { pre: BP_NONE, infix: BP_NONE },
    }
}

/// Pick the binary instruction for an infix operator. `+` becomes the
/// float-tagged addition when the left operand was lexically a float
/// literal — a syntactic distinction, not a semantic one.
fn translate_op<'src>(lhs_kind: TokenKind, op_kind: TokenKind) -> Result<Inst<'src>> {
    let as_float = lhs_kind == TokenKind::Float;
    match op_kind {
        TokenKind::EqualEqual => Ok(Inst::Eq),
        TokenKind::BangEqual => Ok(Inst::Ne),
        TokenKind::Gt => Ok(Inst::Gt),
        TokenKind::Lt => Ok(Inst::Lt),
        TokenKind::Plus => Ok(if as_float { Inst::AddF } else { Inst::Add }),
        TokenKind::Minus => Ok(Inst::Sub),
        TokenKind::Mult => Ok(Inst::Mul),
        TokenKind::Div => Ok(Inst::Div),
        other => Err(CompileError::UnexpectedTokenKind {
            expected: "operator",
            found: other.as_str(),
        }),
    }
}

// ── Compilation state ───────────────────────────────────────────────

/// A declared function: name, entry offset into the program, and arity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct FnDecl<'src> {
    pub name: &'src str,
    pub entry: u64,
    pub arity: u8,
}

#[derive(Debug, Clone, Copy)]
struct Local<'src> {
    name: &'src str,
    depth: u8,
}

/// One lexical context: the top-level "main" context at the bottom of the
/// stack, plus one per function body being compiled. Each carries its own
/// locals so frame-relative offsets start at zero inside a function.
#[derive(Debug)]
struct Scope<'src> {
    #[allow(dead_code)] // kept for dumps and future diagnostics
    name: &'src str,
    depth: u8,
    locals: Vec<Local<'src>>,
}

/// The compiler's output: the instruction program (all contexts emit into
/// this one sequence) and the function descriptor table.
#[derive(Debug, serde::Serialize)]
pub struct CompiledProgram<'src> {
    pub insts: Vec<Inst<'src>>,
    pub fns: Vec<FnDecl<'src>>,
}

/// An instruction index awaiting its true jump target.
#[must_use]
struct JumpSite(usize);

const EOF_TOKEN: Token<'static> = Token { kind: TokenKind::Eof, text: "" };

pub struct Compiler<'t, 'src> {
    tokens: &'t [Token<'src>],
    pos: usize,
    insts: Vec<Inst<'src>>,
    fns: Vec<FnDecl<'src>>,
    scopes: Vec<Scope<'src>>,
}

/// Compile a token sequence into an instruction program. Stops at the first
/// error; the partial program is discarded.
pub fn compile<'src>(tokens: &[Token<'src>]) -> Result<CompiledProgram<'src>> {
    let mut compiler = Compiler::new(tokens);
    compiler.compile_all()?;
    Ok(CompiledProgram { insts: compiler.insts, fns: compiler.fns })
}

impl<'t, 'src> Compiler<'t, 'src> {
    fn new(tokens: &'t [Token<'src>]) -> Self {
        Compiler {
            tokens,
            pos: 0,
            insts: Vec::new(),
            fns: Vec::new(),
            scopes: vec![Scope { name: "main", depth: 0, locals: Vec::new() }],
        }
    }

    // ── Token cursor ────────────────────────────────────────────────

    fn peek(&self) -> Token<'src> {
        self.tokens.get(self.pos).copied().unwrap_or(EOF_TOKEN)
    }

    fn peek_peek(&self) -> Token<'src> {
        self.tokens.get(self.pos + 1).copied().unwrap_or(EOF_TOKEN)
    }

    fn next(&mut self) -> Token<'src> {
        let token = self.peek();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn munch(&mut self, kind: TokenKind) -> Result<()> {
        if self.peek().kind == kind {
            self.pos += 1;
            Ok(())
        } else {
            Err(CompileError::UnexpectedTokenKind {
                expected: kind.as_str(),
                found: self.peek().kind.as_str(),
            })
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token<'src>> {
        if self.peek().kind == kind {
            Ok(self.next())
        } else {
            Err(CompileError::UnexpectedTokenKind {
                expected: kind.as_str(),
                found: self.peek().kind.as_str(),
            })
        }
    }

    // ── Emission ────────────────────────────────────────────────────

    fn emit(&mut self, inst: Inst<'src>) {
        self.insts.push(inst);
    }

    fn loc(&self) -> u64 {
        self.insts.len() as u64
    }

    /// Emit a jump with a placeholder target, returning the site to patch
    /// once the real offset is known.
    fn emit_jump_site(&mut self, inst: Inst<'src>) -> JumpSite {
        let site = JumpSite(self.insts.len());
        self.insts.push(inst);
        site
    }

    fn patch_jump(&mut self, site: JumpSite, target: u64) {
        self.insts[site.0] = match self.insts[site.0] {
            Inst::Jump(_) => Inst::Jump(target),
            Inst::JumpIf(_) => Inst::JumpIf(target),
            Inst::JumpIfNot(_) => Inst::JumpIfNot(target),
            // Only jump instructions are ever recorded as sites.
            other => other,
        };
    }

    // ── Scopes and locals ───────────────────────────────────────────

    fn scope(&self) -> &Scope<'src> {
        // The base "main" scope is never popped.
        self.scopes.last().unwrap_or_else(|| unreachable!("base scope missing"))
    }

    fn scope_mut(&mut self) -> &mut Scope<'src> {
        self.scopes.last_mut().unwrap_or_else(|| unreachable!("base scope missing"))
    }

    fn depth(&self) -> u8 {
        self.scope().depth
    }

    fn add_local(&mut self, name: &'src str) {
        let depth = self.depth();
        self.scope_mut().locals.push(Local { name, depth });
    }

    /// Innermost visible local with this name, if any. Entries declared
    /// deeper than the current depth are invisible.
    fn resolve_local(&self, name: &str) -> Option<u64> {
        let scope = self.scope();
        scope
            .locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, local)| local.name == name && local.depth <= scope.depth)
            .map(|(index, _)| index as u64)
    }

    fn enter_function(&mut self, name: &'src str) {
        let depth = self.depth();
        self.scopes.push(Scope { name, depth, locals: Vec::new() });
    }

    fn leave_function(&mut self) -> Result<()> {
        if self.scopes.len() <= 1 {
            return Err(CompileError::MalformedContext);
        }
        self.scopes.pop();
        Ok(())
    }

    fn resolve_fn(&self, name: &str) -> Result<FnDecl<'src>> {
        self.fns
            .iter()
            .copied()
            .find(|decl| decl.name == name)
            .ok_or_else(|| CompileError::UnknownFunction { name: name.to_string() })
    }

    // ── Expressions ─────────────────────────────────────────────────

    fn expr(&mut self) -> Result<()> {
        self.expr_bp(BP_NONE)
    }

    /// Precedence climbing: consume one leading operand, then fold infix
    /// operators whose binding power reaches `min_bp`.
    fn expr_bp(&mut self, min_bp: u8) -> Result<()> {
        let lhs = self.next();

        match lhs.kind {
            TokenKind::Minus => {
                let pre_bp = binding_power(TokenKind::Minus).pre;
                self.expr_bp(pre_bp)?;
                self.emit(Inst::Neg);
            }
            TokenKind::LParen => {
                self.expr_bp(BP_NONE)?;
                self.munch(TokenKind::RParen)?;
            }
            TokenKind::Identifier if self.peek().kind == TokenKind::LParen => {
                self.expr_call(lhs.text)?;
            }
            TokenKind::Number
            | TokenKind::Float
            | TokenKind::Literal
            | TokenKind::Identifier => self.emit_operand(lhs),
            other => {
                return Err(CompileError::UnexpectedTokenKind {
                    expected: "expression",
                    found: other.as_str(),
                })
            }
        }

        loop {
            let op = self.peek();
            if op.kind == TokenKind::Eof {
                break;
            }

            let in_bp = binding_power(op.kind).infix;
            if in_bp == BP_NONE || in_bp < min_bp {
                break;
            }

            self.pos += 1;
            self.expr_bp(in_bp)?;
            self.emit(translate_op(lhs.kind, op.kind)?);
        }

        Ok(())
    }

    fn emit_operand(&mut self, token: Token<'src>) {
        match token.kind {
            TokenKind::Number => {
                // Overflow saturates rather than erroring.
                let value = token.text.parse::<u64>().unwrap_or(u64::MAX);
                self.emit(Inst::Push(Word::U64(value)));
            }
            TokenKind::Float => {
                let value = token.text.parse::<f64>().unwrap_or(f64::MAX);
                self.emit(Inst::Push(Word::F64(value)));
            }
            TokenKind::Literal => {
                // Strip the surrounding quotes from the slice.
                let inner = &token.text[1..token.text.len() - 1];
                self.emit(Inst::Push(Word::Str(inner)));
            }
            TokenKind::Identifier => match self.resolve_local(token.text) {
                Some(offset) => self.emit(Inst::LoadLocal(offset)),
                None => self.emit(Inst::LoadGlobal(token.text)),
            },
            _ => {}
        }
    }

    /// Compile a call expression: prologue, arguments, frame transfer, jump,
    /// and epilogue. See the calling convention notes on [`crate::vm::Vm`].
    fn expr_call(&mut self, name: &'src str) -> Result<()> {
        let decl = self.resolve_fn(name)?;

        // Save the caller's frame, return address, and staged frame base,
        // then stage this call's own: cpsr := sp, which at this point is
        // exactly where the first argument will land. Saving cpsr lets a
        // call in argument position stage its own base without clobbering
        // ours.
        self.emit(Inst::Load(Reg::Fp));
        self.emit(Inst::Load(Reg::Ra));
        self.emit(Inst::Load(Reg::Cpsr));
        self.emit(Inst::Push(Word::U64(Reg::Sp.as_u64())));
        self.emit(Inst::Mov(Reg::Cpsr));

        self.munch(TokenKind::LParen)?;

        let mut found: u8 = 0;
        if self.peek().kind != TokenKind::RParen {
            loop {
                self.expr()?;
                found = found.saturating_add(1);
                if self.peek().kind != TokenKind::Comma {
                    break;
                }
                self.munch(TokenKind::Comma)?;
            }
        }
        self.munch(TokenKind::RParen)?;

        if found != decl.arity {
            return Err(CompileError::ArityMismatch {
                name: name.to_string(),
                expected: decl.arity,
                found,
            });
        }

        // fp := cpsr — the callee's frame base is the first argument.
        self.emit(Inst::Push(Word::U64(Reg::Cpsr.as_u64())));
        self.emit(Inst::Mov(Reg::Fp));

        // ra := offset of the first post-call instruction (three emissions
        // ahead: this push, the store, and the jump).
        let ra = self.loc() + 3;
        self.emit(Inst::Push(Word::U64(ra)));
        self.emit(Inst::Store(Reg::Ra));
        self.emit(Inst::Jump(decl.entry));

        // Post-call: drop the arguments, restore cpsr/ra/fp in reverse save
        // order, and push the accumulator as the call's result.
        for _ in 0..decl.arity {
            self.emit(Inst::Pop);
        }
        self.emit(Inst::Push(Word::U64(Reg::Fp.as_u64())));
        self.emit(Inst::Mov(Reg::Sp));
        self.emit(Inst::Store(Reg::Cpsr));
        self.emit(Inst::Store(Reg::Ra));
        self.emit(Inst::Store(Reg::Fp));
        self.emit(Inst::Load(Reg::Rax));

        Ok(())
    }

    // ── Statements ──────────────────────────────────────────────────

    fn stmt(&mut self) -> Result<()> {
        let peek = self.peek().kind;
        let peek_peek = self.peek_peek().kind;

        match peek {
            TokenKind::Int | TokenKind::Str => self.stmt_define(),
            TokenKind::Identifier if peek_peek == TokenKind::Equal => self.stmt_assign(false),
            TokenKind::If => self.stmt_if(),
            TokenKind::While => self.stmt_while(),
            TokenKind::Print => self.stmt_print(),
            TokenKind::LBrace => self.stmt_block(),
            TokenKind::Fn => self.stmt_fn(),
            TokenKind::Return => self.stmt_return(),
            _ => self.stmt_expr(),
        }
    }

    /// Typed declaration. The type token is consumed and ignored — there is
    /// no type checking yet.
    fn stmt_define(&mut self) -> Result<()> {
        self.next();
        self.stmt_assign(true)
    }

    /// `name = expr ;` — as a declaration (`is_decl`) it binds a fresh
    /// variable: a global at depth 0, a block-local otherwise. As a plain
    /// assignment it rebinds: a visible local is shadowed by a new local,
    /// an unknown name becomes (or shadows) a global.
    fn stmt_assign(&mut self, is_decl: bool) -> Result<()> {
        let identifier = self.expect(TokenKind::Identifier)?;
        let name = identifier.text;

        self.munch(TokenKind::Equal)?;
        self.expr()?;

        let make_local = if is_decl {
            self.depth() > 0
        } else {
            self.resolve_local(name).is_some()
        };

        if make_local {
            // The expression value stays on the stack as the new local's
            // storage slot; the duplicate that defl pushes is popped right
            // after.
            let index = self.scope().locals.len() as u64;
            self.emit(Inst::DefLocal(index));
            self.add_local(name);
        } else {
            self.emit(Inst::DefGlobal(name));
        }

        self.emit(Inst::Pop);
        self.munch(TokenKind::Semicolon)
    }

    fn stmt_print(&mut self) -> Result<()> {
        self.munch(TokenKind::Print)?;
        self.expr()?;
        self.emit(Inst::Print);
        self.emit(Inst::Pop);
        self.munch(TokenKind::Semicolon)
    }

    fn stmt_expr(&mut self) -> Result<()> {
        self.expr()?;
        self.emit(Inst::Pop);
        self.munch(TokenKind::Semicolon)
    }

    /// `{ ... }` — entering bumps the depth and records the local count;
    /// exiting emits one pop per local declared inside, then truncates the
    /// recorded sequence back to the entry count.
    fn stmt_block(&mut self) -> Result<()> {
        self.munch(TokenKind::LBrace)?;
        self.scope_mut().depth += 1;
        let locals_prev = self.scope().locals.len();

        loop {
            let peek = self.peek().kind;
            if peek == TokenKind::Eof || peek == TokenKind::RBrace {
                break;
            }
            self.stmt()?;
        }

        for _ in 0..self.scope().locals.len() - locals_prev {
            self.emit(Inst::Pop);
        }

        self.scope_mut().locals.truncate(locals_prev);
        self.scope_mut().depth -= 1;
        self.munch(TokenKind::RBrace)
    }

    fn stmt_if(&mut self) -> Result<()> {
        self.munch(TokenKind::If)?;
        self.munch(TokenKind::LParen)?;
        self.expr()?;
        self.munch(TokenKind::RParen)?;

        let cond_site = self.emit_jump_site(Inst::JumpIfNot(u64::MAX));
        self.stmt_block()?;

        // Unconditional jump past the (possible) else branch; the false
        // edge of the condition lands right after it.
        let exit_site = self.emit_jump_site(Inst::Jump(u64::MAX));
        let else_start = self.loc();
        self.patch_jump(cond_site, else_start);

        if self.peek().kind == TokenKind::Else {
            self.munch(TokenKind::Else)?;
            self.stmt_block()?;
        }
        let end = self.loc();
        self.patch_jump(exit_site, end);

        Ok(())
    }

    fn stmt_while(&mut self) -> Result<()> {
        self.munch(TokenKind::While)?;
        self.munch(TokenKind::LParen)?;

        let pred_start = self.loc();
        self.expr()?;
        self.munch(TokenKind::RParen)?;

        let cond_site = self.emit_jump_site(Inst::JumpIfNot(u64::MAX));
        self.stmt_block()?;
        self.emit(Inst::Jump(pred_start));

        // The false edge lands exactly one instruction past the back jump,
        // whatever the body length.
        let loop_end = self.loc();
        self.patch_jump(cond_site, loop_end);

        Ok(())
    }

    fn stmt_fn(&mut self) -> Result<()> {
        self.munch(TokenKind::Fn)?;
        let identifier = self.expect(TokenKind::Identifier)?;
        let name = identifier.text;

        // Skip over the body on top-level fallthrough.
        let skip_site = self.emit_jump_site(Inst::Jump(u64::MAX));
        let entry = self.loc();

        self.enter_function(name);

        let mut arity: u8 = 0;
        self.munch(TokenKind::LParen)?;
        loop {
            if self.peek().kind == TokenKind::RParen {
                break;
            }

            // Parameter type token: consumed, unchecked.
            self.next();

            let param = self.expect(TokenKind::Identifier)?;
            self.add_local(param.text);
            arity = arity.saturating_add(1);

            if self.peek().kind == TokenKind::RParen {
                break;
            }
            self.munch(TokenKind::Comma)?;
        }
        self.munch(TokenKind::RParen)?;

        // Declared before the body compiles, so recursive calls resolve.
        self.fns.push(FnDecl { name, entry, arity });

        self.stmt_block()?;

        // Implicit `return null`. Emitted unconditionally so a body whose
        // returns all sit on conditional paths cannot fall through into the
        // surrounding code; when every path returns it is simply unreachable.
        self.emit(Inst::Push(Word::U64(0)));
        self.emit(Inst::Store(Reg::Rax));
        self.emit(Inst::Ret);

        self.leave_function()?;

        let end = self.loc();
        self.patch_jump(skip_site, end);

        Ok(())
    }

    fn stmt_return(&mut self) -> Result<()> {
        self.munch(TokenKind::Return)?;

        if self.peek().kind == TokenKind::Semicolon {
            self.emit(Inst::Push(Word::U64(0)));
        } else {
            self.expr()?;
        }

        self.emit(Inst::Store(Reg::Rax));
        self.emit(Inst::Ret);
        self.munch(TokenKind::Semicolon)
    }

    fn compile_all(&mut self) -> Result<()> {
        while self.peek().kind != TokenKind::Eof {
            self.stmt()?;
        }
        self.emit(Inst::Halt);
        Ok(())
    }
}
