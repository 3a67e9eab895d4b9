//! Constraint system: rules forbidding names or categories of constructs in a scope
//!
//! A rule matches its targets in one of three ways (an exact name, a
//! category derived from the registry, or every target of the scope) and
//! may exempt named targets. A matched usage is allowed only when all of the
//! rule's conditions hold; a rule without conditions forbids outright.

mod rule;
mod validator;

pub use rule::{
    Comparison, Condition, ConstraintError, ConstraintRule, ConstraintScope, ConstraintSet,
    RuleKind, RuleType, TypeCategory,
};
pub use validator::{evaluate_condition, validate, Target, Violation};
