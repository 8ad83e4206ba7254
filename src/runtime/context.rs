//! Per-run mutable state. A fresh context is built for every run, so nothing
//! leaks from one run into the next.

use std::cell::RefCell;
use std::rc::Rc;

use hashbrown::HashMap;

use crate::graph::KnowledgeGraph;
use crate::gpu::GpuInfo;
use crate::hive::Network;
use crate::prng::Prng;

/// Live source text plus the undo history of self-edits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodeBuffer {
    text: String,
    history: Vec<String>,
}

impl CodeBuffer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            history: Vec::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Replace every occurrence of `target`. A miss (or an empty target)
    /// leaves both the text and the history untouched.
    pub fn self_edit(&mut self, target: &str, replacement: &str) -> bool {
        if target.is_empty() || !self.text.contains(target) {
            return false;
        }
        let edited = self.text.replace(target, replacement);
        self.history.push(std::mem::replace(&mut self.text, edited));
        true
    }

    pub fn rollback(&mut self) -> bool {
        match self.history.pop() {
            Some(prev) => {
                self.text = prev;
                true
            }
            None => false,
        }
    }
}

pub struct RunContext {
    pub run_id: u64,
    /// Networks created through `GB.hive.HiveMind`, in registration order.
    models: Vec<(String, Rc<RefCell<Network>>)>,
    pub graph: KnowledgeGraph,
    pub code: CodeBuffer,
    pub rng: Prng,
    checkpoints: HashMap<String, Vec<u8>>,
    pub gpu: Option<GpuInfo>,
    next_log_id: u64,
    next_confirmation_id: u64,
}

impl RunContext {
    pub fn new(run_id: u64, source: &str, rng: Prng) -> Self {
        Self {
            run_id,
            models: Vec::new(),
            graph: KnowledgeGraph::new(),
            code: CodeBuffer::new(source),
            rng,
            checkpoints: HashMap::new(),
            gpu: None,
            next_log_id: 0,
            next_confirmation_id: 0,
        }
    }

    /// Register `net` under `name`; an existing entry with that name is replaced
    /// in place.
    pub fn register(&mut self, name: &str, net: Rc<RefCell<Network>>) {
        match self.models.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = net,
            None => self.models.push((name.to_string(), net)),
        }
    }

    pub fn model(&self, name: &str) -> Option<&Rc<RefCell<Network>>> {
        self.models.iter().find(|(n, _)| n == name).map(|(_, m)| m)
    }

    pub fn models(&self) -> impl Iterator<Item = &Rc<RefCell<Network>>> {
        self.models.iter().map(|(_, m)| m)
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    pub fn store_checkpoint(&mut self, path: &str, image: Vec<u8>) {
        self.checkpoints.insert(path.to_string(), image);
    }

    pub fn checkpoint(&self, path: &str) -> Option<&[u8]> {
        self.checkpoints.get(path).map(Vec::as_slice)
    }

    pub(crate) fn next_log_id(&mut self) -> String {
        self.next_log_id += 1;
        format!("{}-{}", self.run_id, self.next_log_id)
    }

    pub(crate) fn next_confirmation_id(&mut self) -> u64 {
        self.next_confirmation_id += 1;
        (self.run_id << 32) | self.next_confirmation_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hive::NetworkConfig;

    #[test]
    fn self_edit_miss_is_a_no_op() {
        let mut code = CodeBuffer::new("let a = 1;");
        assert!(!code.self_edit("b = 2", "b = 3"));
        assert!(!code.self_edit("", "x"));
        assert_eq!(code.text(), "let a = 1;");
        assert_eq!(code.history_len(), 0);
    }

    #[test]
    fn edit_then_rollback_restores_text() {
        let mut code = CodeBuffer::new("p = 0.5; q = 0.5;");
        assert!(code.self_edit("0.5", "0.9"));
        assert_eq!(code.text(), "p = 0.9; q = 0.9;");
        assert!(code.rollback());
        assert_eq!(code.text(), "p = 0.5; q = 0.5;");
        assert!(!code.rollback());
    }

    #[test]
    fn registering_a_name_twice_replaces_it() {
        let mut ctx = RunContext::new(1, "", Prng::new(1));
        let cfg = NetworkConfig::default();
        let a = Rc::new(RefCell::new(Network::new("A", &cfg, Prng::new(2)).unwrap()));
        let b = Rc::new(RefCell::new(Network::new("A", &cfg, Prng::new(3)).unwrap()));
        ctx.register("A", a);
        ctx.register("A", b.clone());
        assert_eq!(ctx.model_count(), 1);
        assert!(Rc::ptr_eq(ctx.model("A").unwrap(), &b));
    }

    #[test]
    fn ids_are_unique_per_run() {
        let mut ctx = RunContext::new(2, "", Prng::new(1));
        assert_eq!(ctx.next_log_id(), "2-1");
        assert_eq!(ctx.next_log_id(), "2-2");
        assert_ne!(ctx.next_confirmation_id(), ctx.next_confirmation_id());
    }
}
