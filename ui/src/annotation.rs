//! Declarative UI reactivity keyed to request lifecycle.
//!
//! An owner type declares, once, which of its elements react to requests
//! and how. The declarations become an ordered list of
//! [`UiAnnotationRule`]s, derived on first use and cached per type.
//! [`UiAnnotationProcessor::process`] then applies the rules of one phase to
//! an owner instance.
//!
//! | Action | `OnStart` | `OnEnd` |
//! |--------|-----------|---------|
//! | [`Disable`](ActionKind::Disable) | interaction off | previous value restored |
//! | [`Hide`](ActionKind::Hide) | hidden | previous value restored |
//! | [`Clear`](ActionKind::Clear) | content emptied | nothing |
//! | [`SearchNested`](ActionKind::SearchNested) | sub-owner's rules | sub-owner's rules |
//!
//! # Example
//!
//! ```
//! use dispatch_ui::annotation::{ActionKind, Phase, RuleBuilder, UiAnnotated, UiAnnotationProcessor};
//! use dispatch_ui::widget::View;
//!
//! struct LoginScreen {
//!     ok_button: View,
//!     password: View,
//! }
//!
//! impl UiAnnotated for LoginScreen {
//!     fn declare(rules: &mut RuleBuilder<Self>) {
//!         rules
//!             .element("ok_button", |s| Some(s.ok_button.clone()), &[ActionKind::Disable])
//!             .element("password", |s| Some(s.password.clone()), &[ActionKind::Clear]);
//!     }
//! }
//!
//! let screen = LoginScreen {
//!     ok_button: View::new(),
//!     password: View::new().with_text("hunter2"),
//! };
//! let processor = UiAnnotationProcessor::default();
//!
//! processor.process(&screen, Phase::OnStart).ok();
//! assert!(!screen.ok_button.is_enabled());
//! assert!(screen.password.text().is_empty());
//!
//! processor.process(&screen, Phase::OnEnd).ok();
//! assert!(screen.ok_button.is_enabled());
//! ```

use crate::widget::View;
use arc_swap::ArcSwap;
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// What a rule does to its element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Make the element non-interactive while requests run
    Disable,
    /// Hide the element while requests run
    Hide,
    /// Empty the element's content when requests start
    Clear,
    /// Apply the rules of an embedded sub-owner
    SearchNested,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disable => "DISABLE",
            Self::Hide => "HIDE",
            Self::Clear => "CLEAR",
            Self::SearchNested => "SEARCH_NESTED",
        };
        f.write_str(name)
    }
}

/// Coarse request boundary that triggers rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// The first tracked request started running
    OnStart,
    /// The last running request finished
    OnEnd,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnStart => f.write_str("ON_START"),
            Self::OnEnd => f.write_str("ON_END"),
        }
    }
}

/// Type-erased owner whose rules can be applied.
///
/// Implemented for every [`UiAnnotated`] type; used as the target of
/// [`ActionKind::SearchNested`].
pub trait Annotated: Send + Sync {
    /// Apply this owner's rules for `phase` at nesting level `depth`.
    ///
    /// # Errors
    ///
    /// Returns [`AnnotationError`] if this owner's declarations are malformed.
    fn apply_rules(
        &self,
        processor: &UiAnnotationProcessor,
        phase: Phase,
        depth: usize,
        report: &mut ProcessReport,
    ) -> Result<(), AnnotationError>;
}

/// An owner type with declared UI reactions.
pub trait UiAnnotated: Send + Sync + 'static {
    /// Declare this type's rules. Called once per processor.
    fn declare(rules: &mut RuleBuilder<Self>)
    where
        Self: Sized;
}

impl<T: UiAnnotated> Annotated for T {
    fn apply_rules(
        &self,
        processor: &UiAnnotationProcessor,
        phase: Phase,
        depth: usize,
        report: &mut ProcessReport,
    ) -> Result<(), AnnotationError> {
        processor.apply(self, phase, depth, report)
    }
}

/// Resolves an element of an owner.
pub type ElementAccessor<T> = fn(&T) -> Option<View>;

/// Resolves an embedded sub-owner.
pub type NestedAccessor<T> = fn(&T) -> Option<Arc<dyn Annotated>>;

enum Target<T> {
    Element(ElementAccessor<T>),
    Nested(NestedAccessor<T>),
}

/// One derived rule: field, action and phase.
pub struct UiAnnotationRule<T> {
    field: &'static str,
    action: ActionKind,
    phase: Phase,
    target: Target<T>,
}

impl<T> UiAnnotationRule<T> {
    /// Declared field name.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        self.field
    }

    /// Action applied.
    #[must_use]
    pub const fn action(&self) -> ActionKind {
        self.action
    }

    /// Phase that triggers the rule.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }
}

impl<T> fmt::Debug for UiAnnotationRule<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UiAnnotationRule")
            .field("field", &self.field)
            .field("action", &self.action)
            .field("phase", &self.phase)
            .finish()
    }
}

impl<T> PartialEq for UiAnnotationRule<T> {
    fn eq(&self, other: &Self) -> bool {
        self.field == other.field && self.action == other.action && self.phase == other.phase
    }
}

/// Malformed declaration, reported when rules are derived.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnnotationError {
    /// A field was declared twice
    #[error("{owner}: field `{field}` declared more than once")]
    DuplicateField {
        /// Owner type
        owner: &'static str,
        /// Field name
        field: &'static str,
    },

    /// An element was declared without actions
    #[error("{owner}: field `{field}` declares no actions")]
    NoActions {
        /// Owner type
        owner: &'static str,
        /// Field name
        field: &'static str,
    },

    /// An action was listed twice for one element
    #[error("{owner}: field `{field}` lists {action} more than once")]
    DuplicateAction {
        /// Owner type
        owner: &'static str,
        /// Field name
        field: &'static str,
        /// Repeated action
        action: ActionKind,
    },

    /// `SearchNested` on an element; it needs a sub-owner accessor
    #[error("{owner}: field `{field}` uses SEARCH_NESTED on an element, declare it with `nested`")]
    NestedOnElement {
        /// Owner type
        owner: &'static str,
        /// Field name
        field: &'static str,
    },
}

/// Failure of one rule while processing. Never aborts the remaining rules.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    /// The element or sub-owner is not available
    #[error("{owner}.{field}: element not available for {action}")]
    Unresolved {
        /// Owner type
        owner: &'static str,
        /// Field name
        field: &'static str,
        /// Action that could not be applied
        action: ActionKind,
    },

    /// Nested search went deeper than allowed
    #[error("{owner}.{field}: nested search deeper than {max_depth} levels")]
    DepthExceeded {
        /// Owner type
        owner: &'static str,
        /// Field name
        field: &'static str,
        /// Configured limit
        max_depth: usize,
    },

    /// The sub-owner's declarations are malformed
    #[error("{owner}.{field}: {source}")]
    Nested {
        /// Owner type
        owner: &'static str,
        /// Field name
        field: &'static str,
        /// Declaration error of the sub-owner
        source: AnnotationError,
    },
}

/// Outcome of one [`UiAnnotationProcessor::process`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessReport {
    /// Rules applied, nested ones included
    pub applied: usize,
    /// Rules that failed
    pub errors: Vec<RuleError>,
}

impl ProcessReport {
    /// Whether every rule applied.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Collects the declarations of one owner type.
pub struct RuleBuilder<T> {
    rules: Vec<UiAnnotationRule<T>>,
    fields: Vec<&'static str>,
    error: Option<AnnotationError>,
}

impl<T: 'static> RuleBuilder<T> {
    const fn new() -> Self {
        Self {
            rules: Vec::new(),
            fields: Vec::new(),
            error: None,
        }
    }

    fn claim(&mut self, field: &'static str) -> bool {
        if self.error.is_some() {
            return false;
        }
        if self.fields.contains(&field) {
            self.error = Some(AnnotationError::DuplicateField {
                owner: type_name::<T>(),
                field,
            });
            return false;
        }
        self.fields.push(field);
        true
    }

    /// Declare an element and the actions it takes.
    ///
    /// Actions expand into rules in the order given: reversible actions get
    /// an `OnStart` and an `OnEnd` rule, [`ActionKind::Clear`] only an
    /// `OnStart` rule.
    pub fn element(
        &mut self,
        field: &'static str,
        accessor: ElementAccessor<T>,
        actions: &[ActionKind],
    ) -> &mut Self {
        if !self.claim(field) {
            return self;
        }

        let owner = type_name::<T>();
        if actions.is_empty() {
            self.error = Some(AnnotationError::NoActions { owner, field });
            return self;
        }

        for (index, &action) in actions.iter().enumerate() {
            if action == ActionKind::SearchNested {
                self.error = Some(AnnotationError::NestedOnElement { owner, field });
                return self;
            }
            if actions[..index].contains(&action) {
                self.error = Some(AnnotationError::DuplicateAction {
                    owner,
                    field,
                    action,
                });
                return self;
            }

            let phases: &[Phase] = match action {
                ActionKind::Clear => &[Phase::OnStart],
                _ => &[Phase::OnStart, Phase::OnEnd],
            };
            for &phase in phases {
                self.rules.push(UiAnnotationRule {
                    field,
                    action,
                    phase,
                    target: Target::Element(accessor),
                });
            }
        }
        self
    }

    /// Declare an embedded sub-owner whose own rules apply on both phases.
    pub fn nested(&mut self, field: &'static str, accessor: NestedAccessor<T>) -> &mut Self {
        if !self.claim(field) {
            return self;
        }
        for phase in [Phase::OnStart, Phase::OnEnd] {
            self.rules.push(UiAnnotationRule {
                field,
                action: ActionKind::SearchNested,
                phase,
                target: Target::Nested(accessor),
            });
        }
        self
    }

    fn finish(self) -> Result<Vec<UiAnnotationRule<T>>, AnnotationError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.rules),
        }
    }
}

/// Configuration for [`UiAnnotationProcessor`].
#[derive(Debug, Clone)]
pub struct AnnotationConfig {
    /// Maximum `SearchNested` depth below the processed owner
    pub max_depth: usize,
}

impl AnnotationConfig {
    /// Set the maximum nesting depth
    #[must_use]
    pub const fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self { max_depth: 8 }
    }
}

type CachedRules = Arc<dyn Any + Send + Sync>;

/// Derives, caches and applies annotation rules.
///
/// Share one processor per process; its cache is keyed by owner type and
/// never changes once a type's rules are derived. Reading cached rules takes
/// no lock; a miss publishes a new copy of the cache.
#[derive(Default)]
pub struct UiAnnotationProcessor {
    config: AnnotationConfig,
    cache: ArcSwap<HashMap<TypeId, CachedRules>>,
    derivations: AtomicUsize,
}

impl UiAnnotationProcessor {
    /// Create a processor.
    #[must_use]
    pub fn new(config: AnnotationConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// The ordered rules of `T`, derived on first call and cached.
    ///
    /// # Errors
    ///
    /// Returns [`AnnotationError`] if `T`'s declarations are malformed.
    /// Malformed declarations are not cached.
    pub fn derive_rules<T: UiAnnotated>(
        &self,
    ) -> Result<Arc<Vec<UiAnnotationRule<T>>>, AnnotationError> {
        let key = TypeId::of::<T>();

        if let Some(rules) = self.cached::<T>(key) {
            return Ok(rules);
        }

        let mut builder = RuleBuilder::new();
        T::declare(&mut builder);
        self.derivations.fetch_add(1, Ordering::Relaxed);
        let rules = Arc::new(builder.finish().inspect_err(|err| {
            tracing::error!(owner = type_name::<T>(), error = %err, "Malformed UI declarations");
        })?);

        self.cache.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.entry(key)
                .or_insert_with(|| Arc::clone(&rules) as CachedRules);
            next
        });
        tracing::debug!(owner = type_name::<T>(), rules = rules.len(), "UI rules derived");

        // Another thread may have won the race; keep the first derivation.
        Ok(self.cached::<T>(key).unwrap_or(rules))
    }

    fn cached<T: UiAnnotated>(&self, key: TypeId) -> Option<Arc<Vec<UiAnnotationRule<T>>>> {
        self.cache
            .load()
            .get(&key)
            .cloned()
            .and_then(|any| any.downcast::<Vec<UiAnnotationRule<T>>>().ok())
    }

    /// How many times rules were derived (cache misses).
    #[must_use]
    pub fn derivations(&self) -> usize {
        self.derivations.load(Ordering::Relaxed)
    }

    /// Apply every rule of `owner` whose phase matches, in declaration order.
    ///
    /// Failures of single rules are logged and collected in the report; they
    /// never stop the remaining rules.
    ///
    /// # Errors
    ///
    /// Returns [`AnnotationError`] if `T`'s declarations are malformed.
    pub fn process<T: UiAnnotated>(
        &self,
        owner: &T,
        phase: Phase,
    ) -> Result<ProcessReport, AnnotationError> {
        let mut report = ProcessReport::default();
        self.apply(owner, phase, 0, &mut report)?;
        tracing::debug!(
            owner = type_name::<T>(),
            phase = %phase,
            applied = report.applied,
            failed = report.errors.len(),
            "UI annotations processed"
        );
        Ok(report)
    }

    fn apply<T: UiAnnotated>(
        &self,
        owner: &T,
        phase: Phase,
        depth: usize,
        report: &mut ProcessReport,
    ) -> Result<(), AnnotationError> {
        let rules = self.derive_rules::<T>()?;
        let owner_name = type_name::<T>();

        for rule in rules.iter().filter(|rule| rule.phase == phase) {
            let result = match &rule.target {
                Target::Element(accessor) => accessor(owner)
                    .map(|view| apply_action(&view, rule.action, phase))
                    .ok_or(RuleError::Unresolved {
                        owner: owner_name,
                        field: rule.field,
                        action: rule.action,
                    }),
                Target::Nested(accessor) => {
                    self.apply_nested(owner, owner_name, rule, *accessor, depth, report)
                }
            };

            match result {
                Ok(()) => report.applied += 1,
                Err(err) => {
                    tracing::warn!(error = %err, "UI rule failed");
                    report.errors.push(err);
                }
            }
        }
        Ok(())
    }

    fn apply_nested<T>(
        &self,
        owner: &T,
        owner_name: &'static str,
        rule: &UiAnnotationRule<T>,
        accessor: NestedAccessor<T>,
        depth: usize,
        report: &mut ProcessReport,
    ) -> Result<(), RuleError> {
        if depth >= self.config.max_depth {
            return Err(RuleError::DepthExceeded {
                owner: owner_name,
                field: rule.field,
                max_depth: self.config.max_depth,
            });
        }

        let nested = accessor(owner).ok_or(RuleError::Unresolved {
            owner: owner_name,
            field: rule.field,
            action: rule.action,
        })?;

        nested
            .apply_rules(self, rule.phase, depth + 1, report)
            .map_err(|source| RuleError::Nested {
                owner: owner_name,
                field: rule.field,
                source,
            })
    }
}

impl fmt::Debug for UiAnnotationProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UiAnnotationProcessor")
            .field("config", &self.config)
            .field("derivations", &self.derivations())
            .finish_non_exhaustive()
    }
}

fn apply_action(view: &View, action: ActionKind, phase: Phase) {
    match (action, phase) {
        (ActionKind::Disable, Phase::OnStart) => view.suspend_interaction(),
        (ActionKind::Disable, Phase::OnEnd) => view.restore_interaction(),
        (ActionKind::Hide, Phase::OnStart) => view.suspend_visibility(),
        (ActionKind::Hide, Phase::OnEnd) => view.restore_visibility(),
        (ActionKind::Clear, Phase::OnStart) => view.clear_content(),
        (ActionKind::Clear, Phase::OnEnd) | (ActionKind::SearchNested, _) => {}
    }
}
