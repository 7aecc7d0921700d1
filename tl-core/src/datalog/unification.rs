//! Unification of a rule/query body atom against stored fact tuples.

use super::types::{value_to_fact_string, Substitution};
use crate::ast::{DatalogAtom, DatalogTerm};

/// Unify `atom`'s terms against one ground `fact` tuple, extending
/// `base` with any new bindings. Returns `None` on a mismatch (arity,
/// constant, or a variable already bound to a different value).
pub fn unify_atom_with_fact(
    atom: &DatalogAtom,
    fact: &[String],
    base: &Substitution,
) -> Option<Substitution> {
    if atom.terms.len() != fact.len() {
        return None;
    }
    let mut sub = base.clone();
    for (term, value) in atom.terms.iter().zip(fact) {
        match term {
            DatalogTerm::Variable(name) => match sub.get(name.as_str()) {
                Some(existing) if existing != value => return None,
                Some(_) => {}
                None => sub.bind(name.as_str(), value.clone()),
            },
            DatalogTerm::Constant(v) => {
                if &value_to_fact_string(v) != value {
                    return None;
                }
            }
            DatalogTerm::Arithmetic(_) => {
                // Not meaningful in a body position; never produced by the
                // parser there, but reject defensively rather than panic.
                return None;
            }
        }
    }
    Some(sub)
}

/// Find every fact tuple unifying with `atom`, each paired with the
/// resulting substitution.
pub fn find_matching_facts<'a>(
    atom: &DatalogAtom,
    facts: &'a [Vec<String>],
    base: &Substitution,
) -> Vec<(&'a [String], Substitution)> {
    facts
        .iter()
        .filter_map(|fact| {
            unify_atom_with_fact(atom, fact, base).map(|sub| (fact.as_slice(), sub))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Identifier, SourceLocation};
    use crate::value::Value;

    fn atom(relation: &str, terms: Vec<DatalogTerm>) -> DatalogAtom {
        DatalogAtom {
            relation: Identifier::from(relation),
            terms,
            loc: SourceLocation::default(),
        }
    }

    #[test]
    fn unifies_variable_against_fact_argument() {
        let a = atom(
            "Edge",
            vec![
                DatalogTerm::Constant(Value::string("Alice")),
                DatalogTerm::Variable(Identifier::from("Y")),
            ],
        );
        let fact = vec!["Alice".to_string(), "Bob".to_string()];
        let sub = unify_atom_with_fact(&a, &fact, &Substitution::new()).unwrap();
        assert_eq!(sub.get("Y"), Some("Bob"));
    }

    #[test]
    fn rejects_constant_mismatch() {
        let a = atom(
            "Edge",
            vec![
                DatalogTerm::Constant(Value::string("Alice")),
                DatalogTerm::Variable(Identifier::from("Y")),
            ],
        );
        let fact = vec!["Carol".to_string(), "Bob".to_string()];
        assert!(unify_atom_with_fact(&a, &fact, &Substitution::new()).is_none());
    }

    #[test]
    fn repeated_variable_must_match_same_value() {
        let a = atom(
            "SameAs",
            vec![
                DatalogTerm::Variable(Identifier::from("X")),
                DatalogTerm::Variable(Identifier::from("X")),
            ],
        );
        assert!(unify_atom_with_fact(
            &a,
            &["Alice".to_string(), "Alice".to_string()],
            &Substitution::new()
        )
        .is_some());
        assert!(unify_atom_with_fact(
            &a,
            &["Alice".to_string(), "Bob".to_string()],
            &Substitution::new()
        )
        .is_none());
    }

    #[test]
    fn find_matching_facts_filters_by_predicate_shape() {
        let a = atom(
            "Edge",
            vec![
                DatalogTerm::Constant(Value::string("Alice")),
                DatalogTerm::Variable(Identifier::from("Y")),
            ],
        );
        let facts = vec![
            vec!["Alice".to_string(), "Bob".to_string()],
            vec!["Carol".to_string(), "Dave".to_string()],
            vec!["Alice".to_string(), "Eve".to_string()],
        ];
        let matches = find_matching_facts(&a, &facts, &Substitution::new());
        assert_eq!(matches.len(), 2);
    }
}
