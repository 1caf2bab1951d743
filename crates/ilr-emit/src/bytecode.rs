//! Stub bytecode lowering.
//!
//! Important actions are lowered in walk order to a stack-machine body.
//! Branch targets stay instruction addresses and are placed as [`IlOp::Label`]s
//! at the first action at or after them. Unresolved markers are skipped; the
//! first action without a bytecode form stops lowering. Ops of the actions
//! before it are kept; nothing of the failing action is.

use std::fmt::{self, Write};

use ilr_ir::{
    Action, ActionKind, ArithOp, ArrayIndex, BranchCondition, Call, ConstantPayload, Source, Value, ValueId,
};
use ilr_isa::Condition;
use ilr_lift::MethodAnalysisSession;
use ilr_meta::{FieldAccessChain, FieldRef, MetadataBridge, MethodRef, TypeRef};
use rustc_hash::FxHashMap;
use tracing::{debug, debug_span, trace};

use crate::EmitError;

/// Metadata token operand of `ldtoken`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    Type(TypeRef),
    Method(MethodRef),
    Field(FieldRef),
}

/// One stack-machine instruction.
#[derive(Clone, Debug, PartialEq)]
pub enum IlOp {
    /// Branch target at the given instruction address.
    Label(u64),
    LdArg(u16),
    StArg(u16),
    LdLoc(u16),
    StLoc(u16),
    LdcI4(i32),
    LdcI8(i64),
    LdcR8(f64),
    LdStr(String),
    LdToken(Token),
    LdFtn(MethodRef),
    Pop,
    LdFld(FieldRef),
    LdFlda(FieldRef),
    StFld(FieldRef),
    LdSFld(FieldRef),
    StSFld(FieldRef),
    LdLen,
    LdElem,
    StElem,
    NewObj(TypeRef),
    NewArr(TypeRef),
    Box(TypeRef),
    UnboxAny(TypeRef),
    IsInst(TypeRef),
    CastClass(TypeRef),
    Call(MethodRef),
    CallVirt(MethodRef),
    /// `tail.` prefix of the following call.
    Tail,
    Arith(ArithOp),
    /// Push 1 if the condition holds for the two topmost values, else 0.
    Compare(Condition),
    Br(u64),
    BrTrue(u64),
    BrFalse(u64),
    /// Compare the two topmost values and branch if the condition holds.
    BranchIf { condition: Condition, target: u64 },
    Throw,
    Ret,
}

impl IlOp {
    /// Push an integer literal in the narrowest form.
    #[must_use]
    pub fn integer(value: i64) -> Self {
        i32::try_from(value).map_or(Self::LdcI8(value), Self::LdcI4)
    }
}

/// Output of [`lower`].
#[derive(Clone, Debug, PartialEq)]
pub struct LoweredBody {
    pub ops: Vec<IlOp>,
    /// Declared types of the body's locals, by local index.
    pub locals: Vec<Option<TypeRef>>,
    /// Unresolved markers that were left out.
    pub skipped: usize,
    /// Why lowering stopped early.
    pub error: Option<EmitError>,
}

impl LoweredBody {
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// Textual listing, one op per line.
    #[must_use]
    pub fn listing(&self, bridge: &MetadataBridge) -> String {
        let mut out = String::new();
        for op in &self.ops {
            let _ = writeln!(out, "{}", Listed { op, bridge });
        }
        out
    }
}

/// Lower the important actions of `session` to stub bytecode.
#[must_use]
pub fn lower(session: &MethodAnalysisSession, bridge: &MetadataBridge) -> LoweredBody {
    let _span = debug_span!("lower", start = format_args!("{:#x}", session.start())).entered();
    let mut lowerer = Lowerer::new(session, bridge);
    let mut labels = session.jump_destinations().iter().copied().peekable();
    let mut skipped = 0usize;
    let mut error = None;

    for action in session.actions() {
        if !action.is_important() && !matches!(action.kind, ActionKind::Jump { .. }) {
            continue;
        }
        while let Some(label) = labels.next_if(|&label| label <= action.address()) {
            lowerer.ops.push(IlOp::Label(label));
        }
        if action.is_unresolved() {
            trace!(%action, "skipping unresolved action");
            skipped += 1;
            continue;
        }
        let mark = lowerer.mark();
        if let Err(reason) = lowerer.action(action) {
            lowerer.rollback(mark);
            let err = EmitError::NotRepresentable {
                address: action.address(),
                action: action.name(),
                reason,
            };
            debug!(%err, "lowering stopped");
            error = Some(err);
            break;
        }
    }
    if error.is_none() {
        lowerer.ops.extend(labels.map(IlOp::Label));
    }

    debug!(ops = lowerer.ops.len(), locals = lowerer.locals.len(), skipped, "method lowered");
    LoweredBody {
        ops: lowerer.ops,
        locals: lowerer.locals,
        skipped,
        error,
    }
}

type Step = std::result::Result<(), String>;

struct Lowerer<'a> {
    session: &'a MethodAnalysisSession,
    bridge: &'a MetadataBridge,
    ops: Vec<IlOp>,
    /// Argument index of each incoming parameter value, `this` first.
    args: FxHashMap<ValueId, u16>,
    local_index: FxHashMap<ValueId, u16>,
    locals: Vec<Option<TypeRef>>,
}

impl<'a> Lowerer<'a> {
    fn new(session: &'a MethodAnalysisSession, bridge: &'a MetadataBridge) -> Self {
        let has_this = session.parameters().iter().any(|p| p.is_this);
        let args = session
            .parameters()
            .iter()
            .filter_map(|p| {
                let index = if p.is_this {
                    0
                } else {
                    let local = session.value(p.value).and_then(Value::as_local)?;
                    local.parameter? + u16::from(has_this)
                };
                Some((p.value, index))
            })
            .collect();
        Self {
            session,
            bridge,
            ops: Vec::new(),
            args,
            local_index: FxHashMap::default(),
            locals: Vec::new(),
        }
    }

    #[allow(clippy::too_many_lines)]
    fn action(&mut self, action: &Action) -> Step {
        match &action.kind {
            ActionKind::Reassign { target, value } => {
                self.push_source(*value)?;
                self.store(*target)?;
            }
            ActionKind::FieldRead {
                object, chain, result, ..
            } => {
                self.push_value(*object)?;
                self.field_path(chain);
                self.ops.push(IlOp::LdFld(chain.final_field().clone()));
                self.store(*result)?;
            }
            ActionKind::FieldWrite { object, chain, value } => {
                self.push_value(*object)?;
                self.field_path(chain);
                self.push_source(*value)?;
                self.ops.push(IlOp::StFld(chain.final_field().clone()));
            }
            ActionKind::StaticFieldRead { field, result, .. } => {
                self.ops.push(IlOp::LdSFld(field.clone()));
                self.store(*result)?;
            }
            ActionKind::StaticFieldWrite { field, value } => {
                self.push_source(*value)?;
                self.ops.push(IlOp::StSFld(field.clone()));
            }
            ActionKind::ArrayLength { array, result, .. } => {
                self.push_value(*array)?;
                self.ops.push(IlOp::LdLen);
                self.store(*result)?;
            }
            ActionKind::ArrayElementRead {
                array, index, result, ..
            } => {
                self.push_value(*array)?;
                self.push_index(*index)?;
                self.ops.push(IlOp::LdElem);
                self.store(*result)?;
            }
            ActionKind::ArrayElementWrite { array, index, value } => {
                self.push_value(*array)?;
                self.push_index(*index)?;
                self.push_source(*value)?;
                self.ops.push(IlOp::StElem);
            }
            ActionKind::CallManaged(call) => self.call(call, false)?,
            ActionKind::CallVirtual(call) => self.call(call, true)?,
            ActionKind::TailCall(call) => {
                self.ops.push(IlOp::Tail);
                self.call(call, false)?;
                self.ops.push(IlOp::Ret);
            }
            ActionKind::AllocateInstance { class, result } => {
                let class = class.clone().ok_or("allocated class is unknown")?;
                self.ops.push(IlOp::NewObj(class));
                self.store(*result)?;
            }
            ActionKind::AllocateArray {
                array_type,
                length,
                result,
            } => {
                let array_type = array_type.as_ref().ok_or("array type is unknown")?;
                let element = array_type.element_type().unwrap_or(array_type).clone();
                self.push_source(*length)?;
                self.ops.push(IlOp::NewArr(element));
                self.store(*result)?;
            }
            ActionKind::Box { value, ty, result } => {
                let ty = ty.clone().ok_or("boxed type is unknown")?;
                self.push_source(*value)?;
                self.ops.push(IlOp::Box(ty));
                self.store(*result)?;
            }
            ActionKind::Unbox { object, ty, result } => {
                let ty = ty.clone().ok_or("unboxed type is unknown")?;
                self.push_source(*object)?;
                self.ops.push(IlOp::UnboxAny(ty));
                self.store(*result)?;
            }
            ActionKind::SafeCast {
                object,
                ty,
                throws,
                result,
            } => {
                let ty = ty.clone().ok_or("cast target type is unknown")?;
                self.push_source(*object)?;
                self.ops.push(if *throws { IlOp::CastClass(ty) } else { IlOp::IsInst(ty) });
                self.store(*result)?;
            }
            ActionKind::Throw {
                exception,
                exception_type,
            } => match (exception, exception_type) {
                (Source::Value(id), _) => {
                    self.push_value(*id)?;
                    self.ops.push(IlOp::Throw);
                }
                (_, Some(name)) => {
                    let ty = self
                        .bridge
                        .type_by_full_name(name)
                        .ok_or_else(|| format!("exception type {name} is not in the metadata"))?;
                    self.ops.push(IlOp::NewObj(TypeRef::Definition(ty)));
                    self.ops.push(IlOp::Throw);
                }
                _ => return Err("thrown exception is unknown".to_string()),
            },
            ActionKind::ResolveInternalCall { method, result, .. } => {
                let method = method.clone().ok_or("internal call did not resolve to a method")?;
                self.ops.push(IlOp::LdFtn(method));
                self.store(*result)?;
            }
            ActionKind::TypeToObject { ty, result } => {
                let ty = ty.clone().ok_or("type is unknown")?;
                self.ops.push(IlOp::LdToken(Token::Type(ty)));
                self.store(*result)?;
            }
            ActionKind::Arithmetic {
                op,
                left,
                right,
                result,
                ..
            } => {
                self.push_source(*left)?;
                if !op.is_unary() {
                    self.push_source(*right)?;
                }
                self.ops.push(IlOp::Arith(*op));
                self.store(*result)?;
            }
            ActionKind::IntegerDivision {
                dividend,
                divisor,
                result,
                ..
            } => {
                self.push_source(*dividend)?;
                self.ops.push(IlOp::integer(*divisor));
                self.ops.push(IlOp::Arith(ArithOp::Div));
                self.store(*result)?;
            }
            ActionKind::SetFromComparison {
                condition,
                comparison,
                result,
                ..
            } => {
                self.push_comparison(*comparison)?;
                self.ops.push(IlOp::Compare(*condition));
                self.store(*result)?;
            }
            ActionKind::ConditionalBranch {
                condition,
                target,
                comparison,
                ..
            } => self.branch(*condition, *target, *comparison)?,
            ActionKind::Jump { target, .. } => self.ops.push(IlOp::Br(*target)),
            ActionKind::Return { value } => {
                if let Some(value) = value {
                    self.push_source(*value)?;
                }
                self.ops.push(IlOp::Ret);
            }
            ActionKind::Copy { .. }
            | ActionKind::LoadNumber { .. }
            | ActionKind::LoadConstant { .. }
            | ActionKind::LoadRawString { .. }
            | ActionKind::UnresolvedGlobal { .. }
            | ActionKind::LoadStackAddress { .. }
            | ActionKind::StackStore { .. }
            | ActionKind::StackLoad { .. }
            | ActionKind::LoadClassIdentifier { .. }
            | ActionKind::LoadStaticFieldsPointer { .. }
            | ActionKind::FieldAddress { .. }
            | ActionKind::LoadVirtualFunctionPointer { .. }
            | ActionKind::LoadInterfaceMethod { .. }
            | ActionKind::CallUnresolved { .. }
            | ActionKind::ClassInit { .. }
            | ActionKind::InitializeMethodMetadata { .. }
            | ActionKind::Compare { .. }
            | ActionKind::FpuLoad { .. }
            | ActionKind::FpuStore { .. }
            | ActionKind::Unresolved { .. } => {}
        }
        Ok(())
    }

    fn call(&mut self, call: &Call, virtual_dispatch: bool) -> Step {
        let is_static = self.bridge.method_def(call.method.method).is_some_and(|d| d.is_static);
        if !is_static {
            let this = call.this.ok_or("instance call without `this`")?;
            self.push_value(this)?;
        }
        for (i, arg) in call.args.iter().enumerate() {
            let arg = arg.ok_or_else(|| format!("argument {i} was not found"))?;
            self.push_value(arg)?;
        }
        let method = call.method.clone();
        self.ops.push(if virtual_dispatch {
            IlOp::CallVirt(method)
        } else {
            IlOp::Call(method)
        });
        if let Some(result) = call.result {
            self.store(result)?;
        }
        Ok(())
    }

    fn branch(&mut self, condition: BranchCondition, target: u64, comparison: Option<ilr_ir::ActionId>) -> Step {
        match condition {
            BranchCondition::Flags(condition) => {
                self.push_comparison(comparison)?;
                self.ops.push(IlOp::BranchIf { condition, target });
            }
            BranchCondition::Zero { value, negated } => {
                self.push_source(value)?;
                self.ops.push(if negated { IlOp::BrTrue(target) } else { IlOp::BrFalse(target) });
            }
            BranchCondition::Bit { value, bit, negated } => {
                let mask = 1i64.checked_shl(u32::from(bit)).ok_or("bit index out of range")?;
                self.push_source(value)?;
                self.ops.push(IlOp::integer(mask));
                self.ops.push(IlOp::Arith(ArithOp::And));
                self.ops.push(if negated { IlOp::BrTrue(target) } else { IlOp::BrFalse(target) });
            }
        }
        Ok(())
    }

    fn push_comparison(&mut self, comparison: Option<ilr_ir::ActionId>) -> Step {
        let operands = comparison
            .and_then(|id| self.session.action(id))
            .and_then(|action| match action.kind {
                ActionKind::Compare { left, right, .. } => Some((left, right)),
                _ => None,
            });
        let (left, right) = operands.ok_or("flags were not set by a known comparison")?;
        self.push_source(left)?;
        self.push_source(right)
    }

    /// Addresses of the implied outer fields of a nested chain.
    fn field_path(&mut self, chain: &FieldAccessChain) {
        let links = chain.links();
        let outer = links.len().saturating_sub(1);
        self.ops
            .extend(links.into_iter().take(outer).map(|f| IlOp::LdFlda(f.clone())));
    }

    fn push_index(&mut self, index: ArrayIndex) -> Step {
        match index {
            ArrayIndex::Constant(i) => self.ops.push(IlOp::integer(i)),
            ArrayIndex::Value(id) => self.push_value(id)?,
            ArrayIndex::Unknown => return Err("array index is unknown".to_string()),
        }
        Ok(())
    }

    fn push_source(&mut self, source: Source) -> Step {
        match source {
            Source::Value(id) => self.push_value(id),
            Source::Immediate(n) => {
                self.ops.push(IlOp::integer(n));
                Ok(())
            }
            Source::Unknown => Err("operand was not resolved".to_string()),
        }
    }

    fn push_value(&mut self, id: ValueId) -> Step {
        let op = match self.session.value(id) {
            Some(Value::Local(_)) => match self.args.get(&id) {
                Some(&arg) => IlOp::LdArg(arg),
                None => IlOp::LdLoc(self.local(id)?),
            },
            Some(Value::Constant(constant)) => match &constant.payload {
                ConstantPayload::Number(n) => IlOp::integer(*n),
                ConstantPayload::Float(f) => IlOp::LdcR8(*f),
                ConstantPayload::String(text) => IlOp::LdStr(text.clone()),
                ConstantPayload::Type(ty) => IlOp::LdToken(Token::Type(ty.clone())),
                ConstantPayload::Field(field) => IlOp::LdToken(Token::Field(field.clone())),
                ConstantPayload::Method(method) | ConstantPayload::InterfaceMethod(method) => {
                    IlOp::LdFtn(method.clone())
                }
                other => return Err(format!("{} constant has no bytecode form", other.kind())),
            },
            None => return Err(format!("value {} does not exist", id.0)),
        };
        self.ops.push(op);
        Ok(())
    }

    /// Pop into the slot of `id`; folded constants are dropped.
    fn store(&mut self, id: ValueId) -> Step {
        let op = match self.session.value(id) {
            Some(Value::Local(_)) => match self.args.get(&id) {
                Some(&arg) => IlOp::StArg(arg),
                None => IlOp::StLoc(self.local(id)?),
            },
            _ => IlOp::Pop,
        };
        self.ops.push(op);
        Ok(())
    }

    fn local(&mut self, id: ValueId) -> std::result::Result<u16, String> {
        if let Some(&index) = self.local_index.get(&id) {
            return Ok(index);
        }
        let index = u16::try_from(self.locals.len())
            .map_err(|_| format!("more than {} locals", u16::MAX))?;
        self.locals.push(self.session.value(id).and_then(Value::ty).cloned());
        self.local_index.insert(id, index);
        Ok(index)
    }

    /// Drop everything emitted after `mark`.
    fn rollback(&mut self, mark: Mark) {
        self.ops.truncate(mark.ops);
        self.locals.truncate(mark.locals);
        self.local_index.retain(|_, index| usize::from(*index) < mark.locals);
    }

    const fn mark(&self) -> Mark {
        Mark {
            ops: self.ops.len(),
            locals: self.locals.len(),
        }
    }
}

/// Lowering position before an action.
#[derive(Clone, Copy)]
struct Mark {
    ops: usize,
    locals: usize,
}

/// An op with its metadata operands named.
struct Listed<'a> {
    op: &'a IlOp,
    bridge: &'a MetadataBridge,
}

impl fmt::Display for Listed<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bridge = self.bridge;
        let field = |field: &FieldRef| {
            format!(
                "{}::{}",
                bridge.type_name(&field.declaring_type),
                bridge.field_name(field)
            )
        };
        match self.op {
            IlOp::Label(address) => write!(f, "label_{address:x}:"),
            IlOp::LdArg(i) => write!(f, "ldarg {i}"),
            IlOp::StArg(i) => write!(f, "starg {i}"),
            IlOp::LdLoc(i) => write!(f, "ldloc {i}"),
            IlOp::StLoc(i) => write!(f, "stloc {i}"),
            IlOp::LdcI4(n) => write!(f, "ldc.i4 {n}"),
            IlOp::LdcI8(n) => write!(f, "ldc.i8 {n}"),
            IlOp::LdcR8(x) => write!(f, "ldc.r8 {x:?}"),
            IlOp::LdStr(text) => write!(f, "ldstr {text:?}"),
            IlOp::LdToken(Token::Type(ty)) => write!(f, "ldtoken {}", bridge.type_name(ty)),
            IlOp::LdToken(Token::Method(method)) => write!(f, "ldtoken {}", bridge.method_name(method)),
            IlOp::LdToken(Token::Field(f_ref)) => write!(f, "ldtoken {}", field(f_ref)),
            IlOp::LdFtn(method) => write!(f, "ldftn {}", bridge.method_name(method)),
            IlOp::Pop => f.write_str("pop"),
            IlOp::LdFld(f_ref) => write!(f, "ldfld {}", field(f_ref)),
            IlOp::LdFlda(f_ref) => write!(f, "ldflda {}", field(f_ref)),
            IlOp::StFld(f_ref) => write!(f, "stfld {}", field(f_ref)),
            IlOp::LdSFld(f_ref) => write!(f, "ldsfld {}", field(f_ref)),
            IlOp::StSFld(f_ref) => write!(f, "stsfld {}", field(f_ref)),
            IlOp::LdLen => f.write_str("ldlen"),
            IlOp::LdElem => f.write_str("ldelem"),
            IlOp::StElem => f.write_str("stelem"),
            IlOp::NewObj(ty) => write!(f, "newobj {}::.ctor", bridge.type_name(ty)),
            IlOp::NewArr(ty) => write!(f, "newarr {}", bridge.type_name(ty)),
            IlOp::Box(ty) => write!(f, "box {}", bridge.type_name(ty)),
            IlOp::UnboxAny(ty) => write!(f, "unbox.any {}", bridge.type_name(ty)),
            IlOp::IsInst(ty) => write!(f, "isinst {}", bridge.type_name(ty)),
            IlOp::CastClass(ty) => write!(f, "castclass {}", bridge.type_name(ty)),
            IlOp::Call(method) => write!(f, "call {}", bridge.method_name(method)),
            IlOp::CallVirt(method) => write!(f, "callvirt {}", bridge.method_name(method)),
            IlOp::Tail => f.write_str("tail."),
            IlOp::Arith(op) => f.write_str(arith_mnemonic(*op)),
            IlOp::Compare(condition) => write!(f, "c{}", condition_suffix(*condition)),
            IlOp::Br(target) => write!(f, "br label_{target:x}"),
            IlOp::BrTrue(target) => write!(f, "brtrue label_{target:x}"),
            IlOp::BrFalse(target) => write!(f, "brfalse label_{target:x}"),
            IlOp::BranchIf { condition, target } => {
                write!(f, "b{} label_{target:x}", condition_suffix(*condition))
            }
            IlOp::Throw => f.write_str("throw"),
            IlOp::Ret => f.write_str("ret"),
        }
    }
}

const fn arith_mnemonic(op: ArithOp) -> &'static str {
    match op {
        ArithOp::Add => "add",
        ArithOp::Sub => "sub",
        ArithOp::Mul => "mul",
        ArithOp::Div => "div",
        ArithOp::Rem => "rem",
        ArithOp::And => "and",
        ArithOp::Or => "or",
        ArithOp::Xor => "xor",
        ArithOp::Shl => "shl",
        ArithOp::Shr => "shr",
        ArithOp::Neg => "neg",
        ArithOp::Not => "not",
        ArithOp::Convert => "conv",
    }
}

const fn condition_suffix(condition: Condition) -> &'static str {
    match condition {
        Condition::Equal => "eq",
        Condition::NotEqual => "ne",
        Condition::Less => "lt",
        Condition::LessEqual => "le",
        Condition::Greater => "gt",
        Condition::GreaterEqual => "ge",
        Condition::Below => "lt.un",
        Condition::BelowEqual => "le.un",
        Condition::Above => "gt.un",
        Condition::AboveEqual => "ge.un",
        Condition::Sign => "sign",
        Condition::NotSign => "nsign",
        Condition::Overflow => "ovf",
        Condition::NotOverflow => "novf",
        Condition::Parity => "unord",
        Condition::NotParity => "ord",
    }
}
