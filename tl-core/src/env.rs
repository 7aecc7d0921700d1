//! The shared mutable environment: tensor bindings, label interning, and
//! relational facts. Accessed only by the VM's single thread (§5); no
//! synchronization is required.

use crate::error::{NameKind, TLError};
use crate::tensor::Tensor;
use crate::Result;
use std::collections::{HashMap, HashSet};

/// Mapping tensor-name → tensor value, label interning, and relation →
/// ordered tuple list, plus the Datalog closure's dirty bit.
#[derive(Debug, Default)]
pub struct Environment {
    tensors: HashMap<String, Tensor>,
    labels: HashMap<String, usize>,
    label_order: Vec<String>,
    relations: HashMap<String, Vec<Vec<String>>>,
    relation_seen: HashMap<String, HashSet<Vec<String>>>,
    dirty: bool,
}

impl Environment {
    /// An empty environment.
    pub fn new() -> Self {
        Environment::default()
    }

    /// Bind (or rebind) a tensor. Tensors are value-typed: rebinding
    /// replaces the previous value atomically.
    pub fn bind(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.tensors.insert(name.into(), tensor);
    }

    /// Look up a tensor, failing if it was expected to already exist.
    pub fn lookup(&self, name: &str) -> Result<&Tensor> {
        self.tensors
            .get(name)
            .ok_or_else(|| TLError::missing(NameKind::Tensor, name))
    }

    /// Look up a tensor without requiring it to exist.
    pub fn try_lookup(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    /// Mutable access to a bound tensor, for in-place growth.
    pub fn lookup_mut(&mut self, name: &str) -> Result<&mut Tensor> {
        self.tensors
            .get_mut(name)
            .ok_or_else(|| TLError::missing(NameKind::Tensor, name))
    }

    /// True if a tensor is bound under `name`.
    pub fn has(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    /// Names of every currently bound tensor.
    pub fn tensor_names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(|s| s.as_str())
    }

    /// Intern a label string, assigning a fresh dense integer on first
    /// occurrence. Insertion-order-deterministic: the same string in the
    /// same environment always yields the same integer.
    pub fn intern_label(&mut self, label: &str) -> usize {
        if let Some(&idx) = self.labels.get(label) {
            return idx;
        }
        let idx = self.label_order.len();
        self.labels.insert(label.to_string(), idx);
        self.label_order.push(label.to_string());
        idx
    }

    /// Look up a label's integer index without interning a new one.
    pub fn get_label_index(&self, label: &str) -> Option<usize> {
        self.labels.get(label).copied()
    }

    /// Insert a fact tuple into `relation`, returning whether it was new.
    /// Deduplicates via a per-relation set; sets the dirty bit on a new
    /// insertion.
    pub fn add_fact(&mut self, relation: &str, tuple: Vec<String>) -> bool {
        let seen = self.relation_seen.entry(relation.to_string()).or_default();
        if seen.contains(&tuple) {
            return false;
        }
        seen.insert(tuple.clone());
        self.relations
            .entry(relation.to_string())
            .or_default()
            .push(tuple);
        self.dirty = true;
        true
    }

    /// All tuples currently stored for `relation`, in first-seen order.
    pub fn facts(&self, relation: &str) -> &[Vec<String>] {
        self.relations
            .get(relation)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Names of every relation with at least one fact.
    pub fn relation_names(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(|s| s.as_str())
    }

    /// True iff a fact or rule has been added since the last saturation.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mark the closure dirty (called when a rule is added).
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Clear the dirty bit (called after a successful saturation round).
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;

    #[test]
    fn label_interning_is_deterministic_and_injective() {
        let mut env = Environment::new();
        let a1 = env.intern_label("Alice");
        let b1 = env.intern_label("Bob");
        let a2 = env.intern_label("Alice");
        assert_eq!(a1, a2);
        assert_ne!(a1, b1);
    }

    #[test]
    fn add_fact_is_idempotent() {
        let mut env = Environment::new();
        assert!(env.add_fact("Parent", vec!["Alice".into(), "Bob".into()]));
        assert!(!env.add_fact("Parent", vec!["Alice".into(), "Bob".into()]));
        assert_eq!(env.facts("Parent").len(), 1);
    }

    #[test]
    fn rebinding_a_tensor_replaces_value() {
        let mut env = Environment::new();
        env.bind("A", Tensor::scalar(1.0));
        env.bind("A", Tensor::scalar(2.0));
        assert_eq!(env.lookup("A").unwrap().data, vec![2.0]);
    }

    #[test]
    fn missing_tensor_is_an_error() {
        let env = Environment::new();
        assert!(env.lookup("Nope").is_err());
    }
}
