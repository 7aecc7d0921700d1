//! Rule storage, naive-fixpoint saturation, and query evaluation (§4.4.12).
//!
//! The engine itself is stateless about dirtiness — that bit lives on
//! [`Environment`] alongside the facts it guards, since both rule
//! addition and fact addition need to set it and `Environment` already
//! tracks it for exactly this purpose.

use super::types::{compare_operands, resolve_condition_operand, resolve_term, value_to_fact_string, Substitution};
use super::unification::find_matching_facts;
use crate::ast::{BodyElement, DatalogAtom, DatalogRule, DatalogTerm, Query, QueryTarget};
use crate::env::Environment;
use crate::error::TLError;
use crate::Result;
use std::collections::HashSet;

/// The result of evaluating a Datalog query (§6.4).
#[derive(Debug, Clone, PartialEq)]
pub enum DatalogQueryResult {
    /// A ground query: `True`/`False`.
    Ground(bool),
    /// A query with free variables: the variables in first-appearance
    /// order, and one row of bound values per matching solution. An
    /// empty `rows` prints as `None`.
    Bindings {
        /// Free variable names, first-appearance order.
        vars: Vec<String>,
        /// One row per solution, aligned with `vars`.
        rows: Vec<Vec<String>>,
    },
}

/// Rule storage and saturation/query driver.
#[derive(Debug, Default)]
pub struct DatalogEngine {
    rules: Vec<DatalogRule>,
}

impl DatalogEngine {
    /// An engine with no rules.
    pub fn new() -> Self {
        DatalogEngine::default()
    }

    /// Register a rule, marking the environment's closure dirty.
    pub fn add_rule(&mut self, rule: DatalogRule, env: &mut Environment) {
        self.rules.push(rule);
        env.mark_dirty();
    }

    /// Insert a ground fact, delegating deduplication to the environment.
    pub fn add_fact(&self, atom: &DatalogAtom, env: &mut Environment) -> Result<bool> {
        if !atom.is_ground() {
            return Err(TLError::Shape(format!(
                "fact '{atom}' is not ground: facts may not contain variables"
            )));
        }
        let tuple: Vec<String> = atom
            .terms
            .iter()
            .map(|t| match t {
                DatalogTerm::Constant(v) => Ok(value_to_fact_string(v)),
                _ => unreachable!("is_ground checked above"),
            })
            .collect::<Result<_>>()?;
        Ok(env.add_fact(atom.relation.as_str(), tuple))
    }

    /// Currently registered rules.
    pub fn rules(&self) -> &[DatalogRule] {
        &self.rules
    }

    /// Saturate the fact store: repeatedly apply every rule until a full
    /// round inserts nothing new. A no-op if the environment isn't dirty.
    pub fn saturate(&self, env: &mut Environment) -> Result<()> {
        if !env.is_dirty() {
            return Ok(());
        }
        let mut round = 0usize;
        loop {
            let mut inserted_this_round = 0usize;
            for rule in &self.rules {
                inserted_this_round += apply_rule(rule, env)?;
            }
            tracing::trace!(round, inserted = inserted_this_round, "saturation round");
            if inserted_this_round == 0 {
                break;
            }
            round += 1;
        }
        tracing::debug!(rounds = round + 1, "saturation reached fixpoint");
        env.clear_dirty();
        Ok(())
    }

    /// Evaluate a Datalog query against the (already saturated) fact store.
    pub fn evaluate_query(&self, query: &Query, env: &Environment) -> Result<DatalogQueryResult> {
        let target = match &query.target {
            QueryTarget::Datalog(atom) => atom,
            QueryTarget::Tensor(_) => {
                return Err(TLError::Shape(
                    "evaluate_query called on a tensor query".to_string(),
                ))
            }
        };
        let mut body = Vec::with_capacity(query.body.len() + 1);
        body.push(BodyElement::Atom(target.clone()));
        body.extend(query.body.iter().cloned());

        let mut solutions = Vec::new();
        join(&body, 0, env, Substitution::new(), &mut solutions)?;

        let vars = free_variables(target, &query.body);
        if vars.is_empty() {
            return Ok(DatalogQueryResult::Ground(!solutions.is_empty()));
        }
        let rows = solutions
            .iter()
            .map(|sub| {
                vars.iter()
                    .map(|v| sub.get(v).unwrap_or("").to_string())
                    .collect()
            })
            .collect();
        Ok(DatalogQueryResult::Bindings { vars, rows })
    }
}

/// Apply one rule once: join its body, then insert the head tuple for
/// every satisfying substitution. Returns how many were genuinely new.
fn apply_rule(rule: &DatalogRule, env: &mut Environment) -> Result<usize> {
    let mut solutions = Vec::new();
    join(&rule.body, 0, env, Substitution::new(), &mut solutions)?;

    let mut inserted = 0;
    for sub in &solutions {
        let tuple: Vec<String> = rule
            .head
            .terms
            .iter()
            .map(|t| resolve_term(t, sub))
            .collect::<Result<_>>()?;
        if env.add_fact(rule.head.relation.as_str(), tuple) {
            inserted += 1;
        }
    }
    Ok(inserted)
}

/// Depth-first nested-loop join over a rule/query body. Each recursive
/// call clones the substitution per branch, which gives backtracking for
/// free (no explicit rollback needed).
fn join(
    body: &[BodyElement],
    index: usize,
    env: &Environment,
    subst: Substitution,
    out: &mut Vec<Substitution>,
) -> Result<()> {
    let Some(element) = body.get(index) else {
        out.push(subst);
        return Ok(());
    };
    match element {
        BodyElement::Atom(atom) => {
            let facts = env.facts(atom.relation.as_str());
            for (_, extended) in find_matching_facts(atom, facts, &subst) {
                join(body, index + 1, env, extended, out)?;
            }
            Ok(())
        }
        BodyElement::Negated(atom) => {
            let facts = env.facts(atom.relation.as_str());
            if find_matching_facts(atom, facts, &subst).is_empty() {
                join(body, index + 1, env, subst, out)?;
            }
            Ok(())
        }
        BodyElement::Condition { lhs, op, rhs } => {
            let l = resolve_condition_operand(lhs, &subst)?;
            let r = resolve_condition_operand(rhs, &subst)?;
            if compare_operands(&l, &r, *op) {
                join(body, index + 1, env, subst, out)?;
            }
            Ok(())
        }
    }
}

/// Variables appearing in `target` then `body`, first-appearance order,
/// deduplicated.
fn free_variables(target: &DatalogAtom, body: &[BodyElement]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    let mut visit = |atom: &DatalogAtom| {
        for term in &atom.terms {
            if let DatalogTerm::Variable(name) = term {
                if seen.insert(name.as_str().to_string()) {
                    order.push(name.as_str().to_string());
                }
            }
        }
    };
    visit(target);
    for element in body {
        match element {
            BodyElement::Atom(a) | BodyElement::Negated(a) => visit(a),
            BodyElement::Condition { .. } => {}
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{CompareOp, Identifier, SourceLocation};
    use crate::value::Value;

    fn atom(relation: &str, terms: Vec<DatalogTerm>) -> DatalogAtom {
        DatalogAtom {
            relation: Identifier::from(relation),
            terms,
            loc: SourceLocation::default(),
        }
    }

    fn var(name: &str) -> DatalogTerm {
        DatalogTerm::Variable(Identifier::from(name))
    }

    fn konst(s: &str) -> DatalogTerm {
        DatalogTerm::Constant(Value::string(s))
    }

    #[test]
    fn saturate_derives_transitive_closure() {
        let mut env = Environment::new();
        let mut engine = DatalogEngine::new();
        engine
            .add_fact(&atom("Parent", vec![konst("Alice"), konst("Bob")]), &mut env)
            .unwrap();
        engine
            .add_fact(&atom("Parent", vec![konst("Bob"), konst("Carol")]), &mut env)
            .unwrap();

        // Ancestor(x,y) <- Parent(x,y).
        engine.add_rule(
            DatalogRule {
                head: atom("Ancestor", vec![var("X"), var("Y")]),
                body: vec![BodyElement::Atom(atom("Parent", vec![var("X"), var("Y")]))],
                loc: SourceLocation::default(),
            },
            &mut env,
        );
        // Ancestor(x,z) <- Parent(x,y), Ancestor(y,z).
        engine.add_rule(
            DatalogRule {
                head: atom("Ancestor", vec![var("X"), var("Z")]),
                body: vec![
                    BodyElement::Atom(atom("Parent", vec![var("X"), var("Y")])),
                    BodyElement::Atom(atom("Ancestor", vec![var("Y"), var("Z")])),
                ],
                loc: SourceLocation::default(),
            },
            &mut env,
        );

        engine.saturate(&mut env).unwrap();
        assert_eq!(env.facts("Ancestor").len(), 3);
        assert!(!env.is_dirty());
    }

    #[test]
    fn saturate_is_idempotent() {
        let mut env = Environment::new();
        let mut engine = DatalogEngine::new();
        engine
            .add_fact(&atom("Edge", vec![konst("A"), konst("B")]), &mut env)
            .unwrap();
        engine.saturate(&mut env).unwrap();
        let before = env.facts("Edge").len();
        // No new facts/rules added: saturate is a no-op (env is clean).
        engine.saturate(&mut env).unwrap();
        assert_eq!(env.facts("Edge").len(), before);
    }

    #[test]
    fn negation_excludes_matched_pairs() {
        let mut env = Environment::new();
        let mut engine = DatalogEngine::new();
        engine
            .add_fact(&atom("Person", vec![konst("Alice")]), &mut env)
            .unwrap();
        engine
            .add_fact(&atom("Person", vec![konst("Bob")]), &mut env)
            .unwrap();
        engine
            .add_fact(&atom("Banned", vec![konst("Bob")]), &mut env)
            .unwrap();
        engine.add_rule(
            DatalogRule {
                head: atom("Eligible", vec![var("X")]),
                body: vec![
                    BodyElement::Atom(atom("Person", vec![var("X")])),
                    BodyElement::Negated(atom("Banned", vec![var("X")])),
                ],
                loc: SourceLocation::default(),
            },
            &mut env,
        );
        engine.saturate(&mut env).unwrap();
        assert_eq!(env.facts("Eligible"), &[vec!["Alice".to_string()]]);
    }

    #[test]
    fn arithmetic_head_term_is_evaluated() {
        let mut env = Environment::new();
        let mut engine = DatalogEngine::new();
        engine
            .add_fact(&atom("Score", vec![konst("Alice"), konst("4")]), &mut env)
            .unwrap();
        engine.add_rule(
            DatalogRule {
                head: atom(
                    "Bonus",
                    vec![
                        var("X"),
                        DatalogTerm::Arithmetic(Box::new(crate::ast::Expr::Binary {
                            op: crate::ast::BinaryOp::Mul,
                            lhs: Box::new(crate::ast::Expr::TensorRef(crate::ast::TensorRef::scalar(
                                Identifier::from("Y"),
                                SourceLocation::default(),
                            ))),
                            rhs: Box::new(crate::ast::Expr::Number(crate::ast::NumberLiteral::new("10"))),
                            loc: SourceLocation::default(),
                        })),
                    ],
                ),
                body: vec![BodyElement::Atom(atom("Score", vec![var("X"), var("Y")]))],
                loc: SourceLocation::default(),
            },
            &mut env,
        );
        engine.saturate(&mut env).unwrap();
        assert_eq!(
            env.facts("Bonus"),
            &[vec!["Alice".to_string(), "40".to_string()]]
        );
    }

    #[test]
    fn query_with_variable_enumerates_bindings() {
        let mut env = Environment::new();
        let mut engine = DatalogEngine::new();
        engine
            .add_fact(&atom("Color", vec![konst("Sky"), konst("Blue")]), &mut env)
            .unwrap();
        engine
            .add_fact(&atom("Color", vec![konst("Grass"), konst("Green")]), &mut env)
            .unwrap();
        engine.saturate(&mut env).unwrap();

        let query = Query {
            target: QueryTarget::Datalog(atom("Color", vec![konst("Sky"), var("C")])),
            body: vec![],
            directive: None,
            loc: SourceLocation::default(),
        };
        let result = engine.evaluate_query(&query, &env).unwrap();
        assert_eq!(
            result,
            DatalogQueryResult::Bindings {
                vars: vec!["C".to_string()],
                rows: vec![vec!["Blue".to_string()]],
            }
        );
    }

    #[test]
    fn ground_query_reports_true_or_false() {
        let mut env = Environment::new();
        let mut engine = DatalogEngine::new();
        engine
            .add_fact(&atom("Likes", vec![konst("Alice"), konst("Pizza")]), &mut env)
            .unwrap();
        engine.saturate(&mut env).unwrap();

        let yes = Query {
            target: QueryTarget::Datalog(atom("Likes", vec![konst("Alice"), konst("Pizza")])),
            body: vec![],
            directive: None,
            loc: SourceLocation::default(),
        };
        assert_eq!(
            engine.evaluate_query(&yes, &env).unwrap(),
            DatalogQueryResult::Ground(true)
        );

        let no = Query {
            target: QueryTarget::Datalog(atom("Likes", vec![konst("Bob"), konst("Pizza")])),
            body: vec![],
            directive: None,
            loc: SourceLocation::default(),
        };
        assert_eq!(
            engine.evaluate_query(&no, &env).unwrap(),
            DatalogQueryResult::Ground(false)
        );
    }

    #[test]
    fn conjunctive_query_with_condition_filters_rows() {
        let mut env = Environment::new();
        let mut engine = DatalogEngine::new();
        engine
            .add_fact(&atom("Age", vec![konst("Alice"), konst("30")]), &mut env)
            .unwrap();
        engine
            .add_fact(&atom("Age", vec![konst("Bob"), konst("12")]), &mut env)
            .unwrap();
        engine.saturate(&mut env).unwrap();

        let query = Query {
            target: QueryTarget::Datalog(atom("Age", vec![var("Name"), var("N")])),
            body: vec![BodyElement::Condition {
                lhs: crate::ast::Expr::TensorRef(crate::ast::TensorRef::scalar(
                    Identifier::from("N"),
                    SourceLocation::default(),
                )),
                op: CompareOp::Ge,
                rhs: crate::ast::Expr::Number(crate::ast::NumberLiteral::new("18")),
            }],
            directive: None,
            loc: SourceLocation::default(),
        };
        let result = engine.evaluate_query(&query, &env).unwrap();
        assert_eq!(
            result,
            DatalogQueryResult::Bindings {
                vars: vec!["Name".to_string(), "N".to_string()],
                rows: vec![vec!["Alice".to_string(), "30".to_string()]],
            }
        );
    }
}
