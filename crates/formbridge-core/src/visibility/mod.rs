//! Conditional visibility for form questions.
//!
//! The same evaluator gates both the render plan handed to form viewers and
//! the validation applied to submissions, so the two can never disagree.

pub mod conditions;
pub mod types;

pub use conditions::{evaluate_condition, is_present, should_show_question, string_form};
pub use types::{
    Answers, Condition, ConditionOperator, ConditionalRuleSet, LogicOperator, lenient_rules,
};
