//! Pseudocode rendering.
//!
//! One line per rendered action. Recovered `if`/`else`/`loop` regions become
//! blocks; branches that do not open a region become `goto`s to labels named
//! after the target address.

use std::collections::BTreeSet;

use ilr_cfg::{Region, RegionKind};
use ilr_ir::{
    Action, ActionId, ActionKind, ArithOp, ArrayIndex, BranchCondition, Call, ConstantPayload, Location, Source, Value,
    ValueId,
};
use ilr_isa::Condition;
use ilr_lift::MethodAnalysisSession;
use ilr_meta::{FieldAccessChain, FieldRef, MetadataBridge, TypeRef};
use rustc_hash::FxHashSet;
use tracing::debug_span;

use crate::EmitConfig;

/// Render a lifted method as C#-like pseudocode.
///
/// Tainted methods start with a comment naming the fault; the actions lifted
/// before it are rendered as usual.
#[must_use]
pub fn render_pseudocode(session: &MethodAnalysisSession, bridge: &MetadataBridge, config: &EmitConfig) -> String {
    let _span = debug_span!("render_pseudocode", start = format_args!("{:#x}", session.start())).entered();
    let mut renderer = Renderer::new(session, bridge, config);
    renderer.render();
    renderer.out
}

struct Renderer<'a> {
    session: &'a MethodAnalysisSession,
    bridge: &'a MetadataBridge,
    config: &'a EmitConfig,
    out: String,
    open: Vec<&'a Region>,
    next_region: usize,
    /// Branches rendered as the header of the `if` they open.
    region_branches: FxHashSet<ActionId>,
    /// Targets of rendered `goto`s that have not been placed yet.
    labels: BTreeSet<u64>,
    /// Last line was a conditional `continue`.
    pending_break: bool,
}

impl<'a> Renderer<'a> {
    fn new(session: &'a MethodAnalysisSession, bridge: &'a MetadataBridge, config: &'a EmitConfig) -> Self {
        let region_branches = session
            .regions()
            .iter()
            .filter(|r| r.kind == RegionKind::If)
            .filter_map(|r| r.branch)
            .collect();
        let mut renderer = Self {
            session,
            bridge,
            config,
            out: String::with_capacity(1024),
            open: Vec::new(),
            next_region: 0,
            region_branches,
            labels: BTreeSet::new(),
            pending_break: false,
        };
        renderer.labels = session
            .actions()
            .iter()
            .filter_map(|a| renderer.goto_target(a))
            .collect();
        renderer
    }

    fn render(&mut self) {
        if let Some(taint) = self.session.taint() {
            self.line(0, &format!("// {taint}"));
        }
        let signature = self.signature();
        self.line(0, &signature);
        self.line(0, "{");
        let session = self.session;
        for action in session.actions() {
            let Some(text) = self.statement(action) else {
                continue;
            };
            self.enter(action.address());
            self.place_labels(action.address());
            let text = match (self.config.emit_addresses, text.starts_with("//")) {
                (false, _) => text,
                (true, false) => format!("{text} // {:#x}", action.address()),
                (true, true) => format!("{text} ({:#x})", action.address()),
            };
            self.line(self.depth(), &text);
            self.pending_break = matches!(
                action.kind,
                ActionKind::ConditionalBranch {
                    is_loop_back_edge: true,
                    ..
                }
            );
        }
        self.enter(u64::MAX);
        self.place_labels(u64::MAX);
        self.line(0, "}");
    }

    fn line(&mut self, depth: usize, text: &str) {
        for _ in 0..depth * self.config.indent {
            self.out.push(' ');
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn depth(&self) -> usize {
        1 + self.open.len()
    }

    // ---- structure ----

    /// Close regions ending at or before `address`, then open the ones starting there.
    fn enter(&mut self, address: u64) {
        let session = self.session;
        let regions = session.regions();
        loop {
            self.close_until(address);
            match regions.get(self.next_region) {
                Some(region) if region.start <= address => {
                    self.next_region += 1;
                    self.open_region(region);
                }
                _ => break,
            }
        }
    }

    fn close_until(&mut self, address: u64) {
        while let Some(region) = self.open.last().copied().filter(|r| r.end <= address) {
            if region.kind == RegionKind::Loop && self.pending_break {
                self.line(self.depth(), "break;");
            }
            self.pending_break = false;
            self.open.pop();
            self.line(self.depth(), "}");
        }
    }

    fn open_region(&mut self, region: &'a Region) {
        let header = match region.kind {
            RegionKind::If => {
                // the body runs when the branch over it is not taken
                let test = region
                    .branch
                    .and_then(|id| self.session.action(id))
                    .and_then(|branch| match &branch.kind {
                        ActionKind::ConditionalBranch {
                            condition, comparison, ..
                        } => Some(self.condition(condition, *comparison, true)),
                        _ => None,
                    })
                    .unwrap_or_else(|| "?".to_string());
                format!("if ({test}) {{")
            }
            RegionKind::Else => "else {".to_string(),
            RegionKind::Loop => "loop {".to_string(),
        };
        self.line(self.depth(), &header);
        self.open.push(region);
        self.pending_break = false;
    }

    fn place_labels(&mut self, address: u64) {
        while let Some(&label) = self.labels.first() {
            if label > address {
                break;
            }
            self.labels.pop_first();
            self.line(self.depth(), &format!("{}:", label_name(label)));
        }
    }

    fn goto_target(&self, action: &Action) -> Option<u64> {
        match action.kind {
            ActionKind::ConditionalBranch {
                target,
                is_loop_back_edge: false,
                implicit_null_check: false,
                ..
            } if !self.region_branches.contains(&action.id) => Some(target),
            ActionKind::Jump {
                target,
                structural: false,
            } => Some(target),
            _ => None,
        }
    }

    fn signature(&self) -> String {
        let session = self.session;
        let return_type = session
            .return_type()
            .map_or_else(|| "void".to_string(), |ty| self.type_name(ty));
        let Some(method) = session.method() else {
            return format!("{return_type} sub_{:x}()", session.start());
        };
        let def = self.bridge.method_def(method.method);
        let modifier = if def.is_some_and(|d| d.is_static) { "static " } else { "" };
        let params: Vec<String> = self
            .bridge
            .method_signature(method)
            .map(|sig| {
                sig.params
                    .iter()
                    .enumerate()
                    .map(|(i, ty)| {
                        let name = def
                            .and_then(|d| d.params.get(i))
                            .map_or_else(|| format!("arg{i}"), |p| p.name.clone());
                        format!("{} {name}", self.type_name(ty))
                    })
                    .collect()
            })
            .unwrap_or_default();
        format!(
            "{modifier}{return_type} {}({})",
            self.bridge.method_name(method),
            params.join(", ")
        )
    }

    // ---- statements ----

    fn statement(&self, action: &Action) -> Option<String> {
        if !action.is_important() && !self.config.include_unimportant {
            return None;
        }
        let text = self.text(action)?;
        if text.starts_with("//") && !self.config.emit_comments {
            return None;
        }
        Some(text)
    }

    #[allow(clippy::too_many_lines)]
    fn text(&self, action: &Action) -> Option<String> {
        let text = match &action.kind {
            ActionKind::Copy { dest, value } => format!("{} = {};", self.location(*dest), self.value(*value)),
            ActionKind::Reassign { target, value } => format!("{} = {};", self.value(*target), self.source(*value)),
            ActionKind::LoadNumber { dest, value, result } => self.assign(*result, Some(*dest), value.to_string()),
            ActionKind::LoadConstant { dest, result } => self.assign(*result, Some(*dest), self.value(*result)),
            ActionKind::LoadRawString { dest, text, result } => self.assign(*result, Some(*dest), format!("{text:?}")),
            ActionKind::UnresolvedGlobal { address, .. } => format!("// unresolved global {address:#x}"),
            ActionKind::LoadStackAddress { dest, offset, result } => {
                self.assign(*result, Some(*dest), format!("&{}", stack_slot(*offset)))
            }
            ActionKind::StackStore { offset, value } => format!("{} = {};", stack_slot(*offset), self.source(*value)),
            ActionKind::StackLoad { dest, offset, .. } => {
                format!("{} = {};", self.location(*dest), stack_slot(*offset))
            }
            ActionKind::LoadClassIdentifier { dest, object, result } => {
                self.assign(*result, Some(*dest), format!("{}.klass", self.value(*object)))
            }
            ActionKind::LoadStaticFieldsPointer { dest, class, result } => {
                self.assign(*result, Some(*dest), format!("{}.static_fields", self.type_name(class)))
            }
            ActionKind::FieldRead {
                dest,
                object,
                chain,
                result,
            } => self.assign(*result, Some(*dest), self.field(*object, chain)),
            ActionKind::FieldWrite { object, chain, value } => {
                format!("{} = {};", self.field(*object, chain), self.source(*value))
            }
            ActionKind::FieldAddress {
                dest,
                object,
                chain,
                result,
            } => self.assign(*result, Some(*dest), format!("&{}", self.field(*object, chain))),
            ActionKind::StaticFieldRead { dest, field, result } => {
                self.assign(*result, Some(*dest), self.static_field(field))
            }
            ActionKind::StaticFieldWrite { field, value } => {
                format!("{} = {};", self.static_field(field), self.source(*value))
            }
            ActionKind::ArrayLength { dest, array, result } => {
                self.assign(*result, Some(*dest), format!("{}.Length", self.value(*array)))
            }
            ActionKind::ArrayElementRead {
                dest,
                array,
                index,
                result,
            } => self.assign(*result, Some(*dest), self.element(*array, *index)),
            ActionKind::ArrayElementWrite { array, index, value } => {
                format!("{} = {};", self.element(*array, *index), self.source(*value))
            }
            ActionKind::LoadVirtualFunctionPointer {
                dest,
                class,
                slot,
                method,
            } => format!(
                "{} = {}.vtable[{slot}];{}",
                self.location(*dest),
                self.type_name(class),
                self.method_comment(method.as_ref())
            ),
            ActionKind::LoadInterfaceMethod {
                dest,
                interface,
                slot,
                method,
            } => format!(
                "{} = {}.slot[{slot}];{}",
                self.location(*dest),
                self.type_name(interface),
                self.method_comment(method.as_ref())
            ),
            ActionKind::CallManaged(call) | ActionKind::CallVirtual(call) => {
                let expr = self.call(call);
                match call.result {
                    Some(result) => self.assign(result, None, expr),
                    None => format!("{expr};"),
                }
            }
            ActionKind::TailCall(call) => format!("return {};", self.call(call)),
            ActionKind::CallUnresolved { target, result } => {
                let callee = target.map_or_else(
                    || "call through an unknown pointer".to_string(),
                    |t| format!("call to unknown function {t:#x}"),
                );
                match result.and_then(|r| self.session.value(r)).and_then(Value::as_local) {
                    Some(local) => format!("// {} = {callee}", local.name),
                    None => format!("// {callee}"),
                }
            }
            ActionKind::ClassInit { class } => format!("{}.cctor();", self.optional_type(class.as_ref())),
            ActionKind::InitializeMethodMetadata { usage } => match usage {
                Some(usage) => format!("// initialize metadata usage {usage:#x}"),
                None => "// initialize method metadata".to_string(),
            },
            ActionKind::AllocateInstance { class, result } => {
                self.assign(*result, None, format!("new {}()", self.optional_type(class.as_ref())))
            }
            ActionKind::AllocateArray {
                array_type,
                length,
                result,
            } => {
                let element = array_type.as_ref().map(|t| t.element_type().unwrap_or(t));
                let expr = format!("new {}[{}]", self.optional_type(element), self.source(*length));
                self.assign(*result, None, expr)
            }
            ActionKind::Box { value, result, .. } => {
                self.assign(*result, None, format!("(object){}", self.source(*value)))
            }
            ActionKind::Unbox { object, ty, result } => self.assign(
                *result,
                None,
                format!("({}){}", self.optional_type(ty.as_ref()), self.source(*object)),
            ),
            ActionKind::SafeCast {
                object,
                ty,
                throws,
                result,
            } => {
                let ty = self.optional_type(ty.as_ref());
                let object = self.source(*object);
                let expr = if *throws {
                    format!("({ty}){object}")
                } else {
                    format!("{object} as {ty}")
                };
                self.assign(*result, None, expr)
            }
            ActionKind::Throw {
                exception,
                exception_type,
            } => match (exception, exception_type) {
                (Source::Value(id), _) => format!("throw {};", self.value(*id)),
                (_, Some(name)) => format!("throw new {name}();"),
                _ => "throw;".to_string(),
            },
            ActionKind::ResolveInternalCall { name, method, result } => {
                let name = match (name, method) {
                    (Some(name), _) => name.clone(),
                    (None, Some(method)) => self.bridge.method_name(method),
                    (None, None) => "?".to_string(),
                };
                self.assign(*result, None, format!("resolve_icall({name:?})"))
            }
            ActionKind::TypeToObject { ty, result } => {
                self.assign(*result, None, format!("typeof({})", self.optional_type(ty.as_ref())))
            }
            ActionKind::Arithmetic {
                op,
                dest,
                left,
                right,
                result,
            } => {
                let expr = match op {
                    ArithOp::Convert => {
                        let ty = self
                            .session
                            .value(*result)
                            .and_then(Value::ty)
                            .map_or_else(|| "conv".to_string(), |t| self.type_name(t));
                        format!("({ty}){}", self.source(*left))
                    }
                    op if op.is_unary() => format!("{}{}", op.symbol(), self.source(*left)),
                    op => format!("{} {} {}", self.source(*left), op.symbol(), self.source(*right)),
                };
                self.assign(*result, Some(*dest), expr)
            }
            ActionKind::IntegerDivision {
                dest,
                dividend,
                divisor,
                potentially_wrong,
                result,
            } => {
                let text = self.assign(*result, Some(*dest), format!("{} / {divisor}", self.source(*dividend)));
                if *potentially_wrong && self.config.emit_comments {
                    format!("{text} // divisor recovered inexactly")
                } else {
                    text
                }
            }
            ActionKind::Compare { left, right, .. } => {
                format!("// compare {}, {}", self.source(*left), self.source(*right))
            }
            ActionKind::SetFromComparison {
                dest,
                condition,
                comparison,
                result,
            } => self.assign(*result, Some(*dest), self.comparison(*condition, *comparison)),
            ActionKind::ConditionalBranch {
                condition,
                target,
                comparison,
                is_loop_back_edge,
                implicit_null_check,
            } => {
                if self.region_branches.contains(&action.id) {
                    return None;
                }
                let test = self.condition(condition, *comparison, false);
                if *is_loop_back_edge {
                    format!("if ({test}) continue;")
                } else if *implicit_null_check {
                    format!("// null check: {test}")
                } else {
                    format!("if ({test}) goto {};", label_name(*target))
                }
            }
            ActionKind::Jump { structural: true, .. } => return None,
            ActionKind::Jump { target, .. } => format!("goto {};", label_name(*target)),
            ActionKind::Return { value } => match value {
                Some(value) => format!("return {};", self.source(*value)),
                None => "return;".to_string(),
            },
            ActionKind::FpuLoad { value } => format!("// fpu push {}", self.source(*value)),
            ActionKind::FpuStore { dest, value } => format!("{} = {};", self.location(*dest), self.source(*value)),
            ActionKind::Unresolved { comment } => format!("// {comment}"),
        };
        Some(text)
    }

    /// `Type name = expr;` for locals, `location = expr;` otherwise.
    fn assign(&self, result: ValueId, dest: Option<Location>, expr: String) -> String {
        match self.session.value(result) {
            Some(Value::Local(local)) => {
                let ty = local.ty.as_ref().map_or_else(|| "var".to_string(), |t| self.type_name(t));
                format!("{ty} {} = {expr};", local.name)
            }
            _ => match dest {
                Some(dest) => format!("{} = {expr};", self.location(dest)),
                None => format!("{expr};"),
            },
        }
    }

    fn call(&self, call: &Call) -> String {
        let def = self.bridge.method_def(call.method.method);
        let name = def.map_or_else(|| self.bridge.method_name(&call.method), |d| d.name.clone());
        let receiver = match call.this {
            Some(_) if call.superclass_call => "base".to_string(),
            Some(this) => self.value(this),
            None if def.is_some_and(|d| d.is_static) => self.type_name(&call.method.declaring_type),
            None => "?".to_string(),
        };
        let args: Vec<String> = call
            .args
            .iter()
            .map(|arg| arg.map_or_else(|| "?".to_string(), |id| self.value(id)))
            .collect();
        format!("{receiver}.{name}({})", args.join(", "))
    }

    fn condition(&self, condition: &BranchCondition, comparison: Option<ActionId>, negate: bool) -> String {
        match *condition {
            BranchCondition::Flags(cond) => {
                let cond = if negate { cond.negate() } else { cond };
                self.comparison(cond, comparison)
            }
            BranchCondition::Zero { value, negated } => {
                let op = if negated == negate { "==" } else { "!=" };
                format!("{} {op} 0", self.source(value))
            }
            BranchCondition::Bit { value, bit, negated } => {
                let op = if negated == negate { "==" } else { "!=" };
                let mask = 1u64.checked_shl(u32::from(bit)).unwrap_or_default();
                format!("({} & {mask:#x}) {op} 0", self.source(value))
            }
        }
    }

    fn comparison(&self, cond: Condition, comparison: Option<ActionId>) -> String {
        let operands = comparison
            .and_then(|id| self.session.action(id))
            .and_then(|action| match action.kind {
                ActionKind::Compare { left, right, .. } => Some((left, right)),
                _ => None,
            });
        match (operands, cond) {
            (Some((left, _)), Condition::Sign | Condition::NotSign) => {
                format!("{} {}", self.source(left), cond.symbol())
            }
            (Some((left, right)), _) => format!("{} {} {}", self.source(left), cond.symbol(), self.source(right)),
            (None, _) => format!("flags {}", cond.symbol()),
        }
    }

    // ---- operands ----

    fn value(&self, id: ValueId) -> String {
        match self.session.value(id) {
            Some(Value::Local(local)) => local.name.clone(),
            Some(Value::Constant(constant)) => self.constant(&constant.payload),
            None => "?".to_string(),
        }
    }

    fn constant(&self, payload: &ConstantPayload) -> String {
        match payload {
            ConstantPayload::Type(ty) => format!("typeof({})", self.type_name(ty)),
            ConstantPayload::Method(method) | ConstantPayload::InterfaceMethod(method) => {
                self.bridge.method_name(method)
            }
            ConstantPayload::Field(field) => self.static_field(field),
            ConstantPayload::String(text) => format!("{text:?}"),
            ConstantPayload::Number(n) => n.to_string(),
            ConstantPayload::Float(f) => format!("{f:?}"),
            ConstantPayload::ClassIdentifier(ty) => format!("{}.klass", self.type_name(ty)),
            ConstantPayload::StaticFieldsPointer(ty) => format!("{}.static_fields", self.type_name(ty)),
            ConstantPayload::StackPointer(offset) => format!("&{}", stack_slot(*offset)),
            ConstantPayload::ArrayOffsetPointer { array, index } => {
                let index = index.map_or_else(|| "?".to_string(), |i| i.to_string());
                format!("&{}[{index}]", self.value(*array))
            }
            ConstantPayload::FieldPointer { object, chain } => format!("&{}", self.field(*object, chain)),
            ConstantPayload::UnresolvedGlobal(address) => format!("global_{address:x}"),
            ConstantPayload::IntegerDivision(division) => {
                let dividend = division.dividend.map_or_else(|| "?".to_string(), |d| self.value(d));
                format!("mulhi({dividend}, {:#x})", division.multiplier)
            }
        }
    }

    fn source(&self, source: Source) -> String {
        match source {
            Source::Value(id) => self.value(id),
            Source::Immediate(n) => n.to_string(),
            Source::Unknown => "?".to_string(),
        }
    }

    fn location(&self, location: Location) -> String {
        match location {
            Location::Register(reg) => reg.name_for(self.session.arch()),
            Location::Stack(offset) => stack_slot(offset),
        }
    }

    fn field(&self, object: ValueId, chain: &FieldAccessChain) -> String {
        format!("{}.{}", self.value(object), self.bridge.chain_name(chain))
    }

    fn static_field(&self, field: &FieldRef) -> String {
        format!(
            "{}.{}",
            self.type_name(&field.declaring_type),
            self.bridge.field_name(field)
        )
    }

    fn element(&self, array: ValueId, index: ArrayIndex) -> String {
        let index = match index {
            ArrayIndex::Constant(i) => i.to_string(),
            ArrayIndex::Value(id) => self.value(id),
            ArrayIndex::Unknown => "?".to_string(),
        };
        format!("{}[{index}]", self.value(array))
    }

    fn type_name(&self, ty: &TypeRef) -> String {
        self.bridge.type_name(ty)
    }

    fn optional_type(&self, ty: Option<&TypeRef>) -> String {
        ty.map_or_else(|| "?".to_string(), |t| self.type_name(t))
    }

    fn method_comment(&self, method: Option<&ilr_meta::MethodRef>) -> String {
        method.map_or_else(String::new, |m| format!(" // {}", self.bridge.method_name(m)))
    }
}

fn label_name(address: u64) -> String {
    format!("label_{address:x}")
}

fn stack_slot(offset: i64) -> String {
    if offset < 0 {
        format!("stack[-{:#x}]", offset.unsigned_abs())
    } else {
        format!("stack[{offset:#x}]")
    }
}

#[cfg(test)]
mod tests {
    use ilr_isa::Arch;

    use super::*;
    use crate::fixture::{Fixture, lift_listing};

    #[test]
    fn test_render_field_update() {
        let fixture = Fixture::new();
        let session = lift_listing(
            &fixture,
            Arch::X86_64,
            "0x3000 mov eax, dword ptr [rcx + 0x10]\n\
             0x3003 add eax, edx\n\
             0x3005 mov dword ptr [rcx + 0x10], eax\n\
             0x3008 ret",
        );
        let text = render_pseudocode(&session, fixture.bridge(), &EmitConfig::default());
        assert_eq!(
            text,
            "System.Int32 Game.Unit::Heal(System.Int32 amount)\n\
             {\n    \
                 System.Int32 local0 = this.health;\n    \
                 System.Int32 local1 = local0 + amount;\n    \
                 this.health = local1;\n    \
                 return local1;\n\
             }\n"
        );
    }

    #[test]
    fn test_if_else_regions_indent() {
        let fixture = Fixture::new();
        let session = lift_listing(
            &fixture,
            Arch::X86_64,
            "0x3000 cmp edx, 3\n\
             0x3003 jle 0x300b\n\
             0x3005 mov dword ptr [rcx + 0x10], edx\n\
             0x3008 jmp 0x3012\n\
             0x300b mov dword ptr [rcx + 0x10], 0\n\
             0x3012 mov eax, edx\n\
             0x3014 ret",
        );
        let text = render_pseudocode(&session, fixture.bridge(), &EmitConfig::default());
        let body: Vec<&str> = text.lines().skip(2).collect();
        assert_eq!(
            body,
            [
                "    if (amount > 3) {",
                "        this.health = amount;",
                "    }",
                "    else {",
                "        this.health = 0;",
                "    }",
                "    return amount;",
                "}",
            ]
        );
    }

    #[test]
    fn test_null_check_throw() {
        let fixture = Fixture::new();
        let session = lift_listing(
            &fixture,
            Arch::X86_64,
            "0x2000 test rcx, rcx\n\
             0x2003 je 0x200a\n\
             0x2005 mov eax, dword ptr [rcx + 0x10]\n\
             0x2008 ret\n\
             0x200a call 0x9100",
        );
        let text = render_pseudocode(&session, fixture.bridge(), &EmitConfig::default());
        assert!(text.contains("    if (this != 0) {\n"));
        assert!(text.contains("        System.Int32 local0 = this.health;\n"));
        assert!(text.contains("    throw new System.NullReferenceException();\n"));
    }

    #[test]
    fn test_unresolved_is_comment() {
        let fixture = Fixture::new();
        let listing = "0x2000 call 0x7777\n0x2005 ret";
        let session = lift_listing(&fixture, Arch::X86_64, listing);
        let text = render_pseudocode(&session, fixture.bridge(), &EmitConfig::default());
        assert!(text.contains("// local0 = call to unknown function 0x7777"));

        let quiet = render_pseudocode(&session, fixture.bridge(), &EmitConfig::new().with_comments(false));
        assert!(!quiet.contains("//"));
    }

    #[test]
    fn test_tainted_method_prefix() {
        let fixture = Fixture::new();
        let instructions = ilr_isa::parse_listing(Arch::X86, "0x2000 add esp, 8\n0x2003 ret").unwrap();
        let session = ilr_lift::lift_method(
            fixture.narrow_bridge(),
            Arch::X86,
            &instructions,
            &ilr_lift::LiftConfig::default(),
        );
        assert!(session.is_tainted());
        let text = render_pseudocode(&session, fixture.narrow_bridge(), &EmitConfig::default());
        assert!(text.starts_with("// tainted at 0x2000"));
    }

    #[test]
    fn test_addresses_and_unimportant() {
        let fixture = Fixture::new();
        let session = lift_listing(&fixture, Arch::X86_64, "0x2000 mov eax, 7\n0x2005 ret");
        let config = EmitConfig::new().with_unimportant(true).with_addresses(true).with_indent(2);
        let text = render_pseudocode(&session, fixture.bridge(), &config);
        assert!(text.contains("\n  rax = 7; // 0x2000\n") || text.contains("local0 = 7; // 0x2000\n"));
        assert!(text.contains("  return 7; // 0x2005\n"));
    }

    #[test]
    fn test_stack_slot_names() {
        assert_eq!(stack_slot(-0x18), "stack[-0x18]");
        assert_eq!(stack_slot(8), "stack[0x8]");
    }
}
