use cranelift::codegen::ir::BlockArg;
use cranelift::prelude::*;

use crate::ast::{BinOp, UnaryOp};
use crate::error::LowerError;
use crate::typechecker::{TBlock, TExpr, TStmt};

use super::{FnCompiler, WORD};

impl FnCompiler<'_> {
    /// Compile a block; a block without a tail yields a dummy zero.
    pub(crate) fn compile_block(&mut self, block: &TBlock) -> Result<Value, LowerError> {
        for stmt in &block.stmts {
            self.compile_stmt(stmt)?;
        }
        match &block.tail {
            Some(tail) => self.compile_expr(tail),
            None => Ok(self.builder.ins().iconst(WORD, 0)),
        }
    }

    fn compile_stmt(&mut self, stmt: &TStmt) -> Result<(), LowerError> {
        match stmt {
            TStmt::Let { local, value } => {
                let val = self.compile_expr(value)?;
                let var = self.builder.declare_var(WORD);
                self.builder.def_var(var, val);
                self.locals.insert(*local, var);
            }
            TStmt::Store { symbol, value } => {
                let val = self.compile_expr(value)?;
                let addr = self.data_address(symbol);
                self.builder.ins().store(MemFlags::trusted(), val, addr, 0);
            }
            TStmt::Expr(expr) => {
                self.compile_expr(expr)?;
            }
        }
        Ok(())
    }

    pub(crate) fn compile_expr(&mut self, expr: &TExpr) -> Result<Value, LowerError> {
        match expr {
            TExpr::Int(value) => Ok(self.builder.ins().iconst(WORD, *value)),
            TExpr::Bool(value) => Ok(self.builder.ins().iconst(WORD, i64::from(*value))),
            TExpr::Local { id, .. } => {
                let var = *self
                    .locals
                    .get(id)
                    .ok_or_else(|| self.error(format!("undefined local #{}", id)))?;
                Ok(self.builder.use_var(var))
            }
            TExpr::Global { symbol, .. } => {
                let addr = self.data_address(symbol);
                Ok(self
                    .builder
                    .ins()
                    .load(WORD, MemFlags::trusted(), addr, 0))
            }
            TExpr::Call { callee, args, ty } => {
                let mut arg_vals = Vec::with_capacity(args.len());
                for arg in args {
                    arg_vals.push(self.compile_expr(arg)?);
                }
                let func_ref = self.func_ref(callee.symbol(), callee.sig());
                let call = self.builder.ins().call(func_ref, &arg_vals);
                if ty.has_value() {
                    Ok(self.builder.inst_results(call)[0])
                } else {
                    Ok(self.builder.ins().iconst(WORD, 0))
                }
            }
            TExpr::Binary { op, lhs, rhs, .. } => match op {
                BinOp::And | BinOp::Or => self.compile_logical(*op, lhs, rhs),
                _ => {
                    let l = self.compile_expr(lhs)?;
                    let r = self.compile_expr(rhs)?;
                    Ok(self.compile_arith(*op, l, r))
                }
            },
            TExpr::Unary { op, operand, .. } => {
                let v = self.compile_expr(operand)?;
                Ok(match op {
                    UnaryOp::Neg => self.builder.ins().ineg(v),
                    UnaryOp::Not => self.builder.ins().bxor_imm(v, 1),
                })
            }
            TExpr::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                let cond_val = self.compile_expr(cond)?;

                let then_bb = self.builder.create_block();
                let else_bb = self.builder.create_block();
                let merge_bb = self.builder.create_block();
                self.builder.append_block_param(merge_bb, WORD);

                self.builder
                    .ins()
                    .brif(cond_val, then_bb, &[], else_bb, &[]);

                self.builder.switch_to_block(then_bb);
                let then_val = self.compile_block(then_block)?;
                self.builder
                    .ins()
                    .jump(merge_bb, &[BlockArg::Value(then_val)]);

                self.builder.switch_to_block(else_bb);
                let else_val = match else_block {
                    Some(block) => self.compile_block(block)?,
                    None => self.builder.ins().iconst(WORD, 0),
                };
                self.builder
                    .ins()
                    .jump(merge_bb, &[BlockArg::Value(else_val)]);

                self.builder.switch_to_block(merge_bb);
                Ok(self.builder.block_params(merge_bb)[0])
            }
        }
    }

    /// Short-circuiting `&&` / `||` on 0/1 words.
    fn compile_logical(&mut self, op: BinOp, lhs: &TExpr, rhs: &TExpr) -> Result<Value, LowerError> {
        let l = self.compile_expr(lhs)?;

        let rhs_bb = self.builder.create_block();
        let short_bb = self.builder.create_block();
        let merge_bb = self.builder.create_block();
        self.builder.append_block_param(merge_bb, WORD);

        if op == BinOp::And {
            self.builder.ins().brif(l, rhs_bb, &[], short_bb, &[]);
        } else {
            self.builder.ins().brif(l, short_bb, &[], rhs_bb, &[]);
        }

        self.builder.switch_to_block(rhs_bb);
        let r = self.compile_expr(rhs)?;
        self.builder.ins().jump(merge_bb, &[BlockArg::Value(r)]);

        self.builder.switch_to_block(short_bb);
        let short = self
            .builder
            .ins()
            .iconst(WORD, i64::from(op == BinOp::Or));
        self.builder.ins().jump(merge_bb, &[BlockArg::Value(short)]);

        self.builder.switch_to_block(merge_bb);
        Ok(self.builder.block_params(merge_bb)[0])
    }

    fn compile_arith(&mut self, op: BinOp, l: Value, r: Value) -> Value {
        let cc = match op {
            BinOp::Eq => Some(IntCC::Equal),
            BinOp::Ne => Some(IntCC::NotEqual),
            BinOp::Lt => Some(IntCC::SignedLessThan),
            BinOp::Le => Some(IntCC::SignedLessThanOrEqual),
            BinOp::Gt => Some(IntCC::SignedGreaterThan),
            BinOp::Ge => Some(IntCC::SignedGreaterThanOrEqual),
            _ => None,
        };
        if let Some(cc) = cc {
            let flag = self.builder.ins().icmp(cc, l, r);
            return self.builder.ins().uextend(WORD, flag);
        }
        match op {
            BinOp::Add => self.builder.ins().iadd(l, r),
            BinOp::Sub => self.builder.ins().isub(l, r),
            BinOp::Mul => self.builder.ins().imul(l, r),
            BinOp::Div | BinOp::Rem => self.compile_division(op, l, r),
            // Comparisons and logical operators are handled above.
            _ => l,
        }
    }

    /// Division that never traps: by zero yields 0, by -1 negates (wrapping)
    /// for `/` and yields 0 for `%`.
    fn compile_division(&mut self, op: BinOp, l: Value, r: Value) -> Value {
        let is_zero = self.builder.ins().icmp_imm(IntCC::Equal, r, 0);
        let is_neg_one = self.builder.ins().icmp_imm(IntCC::Equal, r, -1);
        let special = self.builder.ins().bor(is_zero, is_neg_one);
        let one = self.builder.ins().iconst(WORD, 1);
        let safe_r = self.builder.ins().select(special, one, r);
        let zero = self.builder.ins().iconst(WORD, 0);
        if op == BinOp::Div {
            let quotient = self.builder.ins().sdiv(l, safe_r);
            let negated = self.builder.ins().ineg(l);
            let by_neg_one = self.builder.ins().select(is_neg_one, negated, quotient);
            self.builder.ins().select(is_zero, zero, by_neg_one)
        } else {
            let remainder = self.builder.ins().srem(l, safe_r);
            self.builder.ins().select(special, zero, remainder)
        }
    }
}
