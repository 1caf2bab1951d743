//! Method and batch lifting against one metadata bridge.

use std::sync::Arc;

use ilr_emit::{EmitConfig, IlOp, lower, render_pseudocode};
use ilr_isa::{Arch, Instruction};
use ilr_lift::{LiftConfig, MethodAnalysisSession, lift_method, lift_method_as};
use ilr_meta::{MetadataBridge, MethodId, MethodRef};
use rayon::prelude::*;
use tracing::{debug, info, info_span, warn};

use crate::{Disassembler, Error, Result, metrics};

/// Lifts method bodies of one binary.
///
/// The bridge is shared read-only; a `Lifter` can be used from many threads.
#[derive(Clone)]
pub struct Lifter {
    bridge: Arc<MetadataBridge>,
    arch: Arch,
    config: LiftConfig,
}

impl Lifter {
    #[must_use]
    pub fn new(bridge: Arc<MetadataBridge>, arch: Arch) -> Self {
        Self {
            bridge,
            arch,
            config: LiftConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: LiftConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn bridge(&self) -> &MetadataBridge {
        &self.bridge
    }

    #[must_use]
    pub const fn arch(&self) -> Arch {
        self.arch
    }

    #[must_use]
    pub const fn config(&self) -> &LiftConfig {
        &self.config
    }

    /// Lift already decoded instructions; the method is looked up by the
    /// address of the first one.
    #[must_use]
    pub fn lift_instructions(&self, instructions: &[Instruction]) -> MethodAnalysisSession {
        let session = lift_method(&self.bridge, self.arch, instructions, &self.config);
        metrics::record_session(&session);
        session
    }

    /// Disassemble and lift one compiled method.
    ///
    /// A lift that stops early still returns its session, tainted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoMethodBody`] when the method has no code bytes,
    /// [`Error::Disassembly`] when nothing decodes, or whatever error the
    /// disassembler itself reports.
    pub fn lift_method(&self, method: &MethodRef, disassembler: &dyn Disassembler) -> Result<MethodAnalysisSession> {
        let outcome = self.try_lift(method, disassembler);
        match &outcome {
            Ok(session) => metrics::record_session(session),
            Err(err) => {
                warn!(method = %self.bridge.method_name(method), %err, "method not lifted");
                metrics::record_failure(self.arch);
            }
        }
        outcome
    }

    fn try_lift(&self, method: &MethodRef, disassembler: &dyn Disassembler) -> Result<MethodAnalysisSession> {
        let (address, code) = self
            .bridge
            .source()
            .method_byte_range(method.method)
            .ok_or(Error::NoMethodBody(method.method))?;
        let instructions = disassembler.disassemble(self.arch, address, code)?;
        if instructions.is_empty() {
            return Err(Error::Disassembly {
                address,
                message: "no instructions decoded".to_string(),
            });
        }
        Ok(lift_method_as(
            &self.bridge,
            self.arch,
            &instructions,
            Some(method.clone()),
            &self.config,
        ))
    }

    /// Every method definition with a compiled body, in definition order.
    #[must_use]
    pub fn compiled_methods(&self) -> Vec<MethodRef> {
        self.bridge
            .source()
            .method_definitions()
            .iter()
            .zip((0..).map(MethodId))
            .filter(|(def, _)| def.address.is_some())
            .map(|(def, id)| MethodRef::new(id, def.declaring_type))
            .collect()
    }

    /// Lift `methods` in parallel. Results keep the input order.
    pub fn lift_batch<D: Disassembler>(&self, methods: &[MethodRef], disassembler: &D) -> BatchReport {
        let _span = info_span!("lift_batch", arch = %self.arch, methods = methods.len()).entered();

        let outcomes: Vec<MethodOutcome> = methods
            .par_iter()
            .map(|method| MethodOutcome {
                method: method.clone(),
                result: self.lift_method(method, disassembler),
            })
            .collect();

        let report = BatchReport { outcomes };
        info!(
            succeeded = report.succeeded(),
            tainted = report.tainted(),
            failed = report.failed(),
            "batch lifted"
        );
        report
    }

    /// Pseudocode of a lifted method.
    #[must_use]
    pub fn pseudocode(&self, session: &MethodAnalysisSession, config: &EmitConfig) -> String {
        render_pseudocode(session, &self.bridge, config)
    }

    /// Managed bytecode of a lifted method.
    ///
    /// Unresolved markers are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Emit`] for the first action with no bytecode form.
    pub fn bytecode(&self, session: &MethodAnalysisSession) -> Result<Vec<IlOp>> {
        let body = lower(session, &self.bridge);
        if let Some(err) = body.error {
            return Err(err.into());
        }
        debug!(ops = body.ops.len(), skipped = body.skipped, "method lowered");
        Ok(body.ops)
    }
}

/// Outcome of one method in a batch.
#[derive(Debug)]
pub struct MethodOutcome {
    pub method: MethodRef,
    pub result: Result<MethodAnalysisSession>,
}

/// Per-method outcomes of [`Lifter::lift_batch`].
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<MethodOutcome>,
}

impl BatchReport {
    /// Sessions of the methods that were lifted, tainted ones included.
    pub fn sessions(&self) -> impl Iterator<Item = &MethodAnalysisSession> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    /// Methods that could not be lifted.
    pub fn failures(&self) -> impl Iterator<Item = (&MethodRef, &Error)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|err| (&o.method, err)))
    }

    /// Lifted without taint.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.sessions().filter(|s| !s.is_tainted()).count()
    }

    #[must_use]
    pub fn tainted(&self) -> usize {
        self.sessions().filter(|s| s.is_tainted()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.failures().count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}
