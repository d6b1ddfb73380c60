use std::collections::{HashMap, VecDeque};

use crate::storage::descriptor_store::{DescriptorBatch, DescriptorStore};

/// Descriptor batches for one employee, oldest evicted first past `cap`.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorSet {
    batches: VecDeque<DescriptorBatch>,
    cap: usize,
}

impl DescriptorSet {
    pub fn new(cap: usize) -> Self {
        Self {
            batches: VecDeque::new(),
            cap: cap.max(1),
        }
    }

    /// Keeps the newest `cap` batches of `batches`.
    pub fn from_batches(batches: Vec<DescriptorBatch>, cap: usize) -> Self {
        let mut set = Self::new(cap);
        for batch in batches {
            set.push(batch);
        }
        set
    }

    /// Returns how many batches were evicted.
    pub fn push(&mut self, batch: DescriptorBatch) -> usize {
        self.batches.push_back(batch);
        let mut evicted = 0;
        while self.batches.len() > self.cap {
            self.batches.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn batches(&self) -> &VecDeque<DescriptorBatch> {
        &self.batches
    }

    pub fn to_vec(&self) -> Vec<DescriptorBatch> {
        self.batches.iter().cloned().collect()
    }
}

/// In-memory descriptor sets for every enrolled employee.
#[derive(Debug, Clone)]
pub struct FaceIndex {
    sets: HashMap<String, DescriptorSet>,
    cap: usize,
}

impl FaceIndex {
    pub fn new(cap: usize) -> Self {
        Self {
            sets: HashMap::new(),
            cap,
        }
    }

    pub fn load(store: &DescriptorStore, cap: usize) -> Self {
        let mut index = Self::new(cap);
        for id in store.indexed_ids() {
            let batches = store.load(&id);
            if !batches.is_empty() {
                index.replace(&id, batches);
            }
        }
        tracing::info!(employees = index.sets.len(), "face_index_loaded");
        index
    }

    pub fn get(&self, employee_id: &str) -> Option<&DescriptorSet> {
        self.sets.get(employee_id)
    }

    pub fn batch_count(&self, employee_id: &str) -> usize {
        self.sets.get(employee_id).map_or(0, DescriptorSet::len)
    }

    pub fn push(&mut self, employee_id: &str, batch: DescriptorBatch) -> &DescriptorSet {
        let cap = self.cap;
        let set = self
            .sets
            .entry(employee_id.to_string())
            .or_insert_with(|| DescriptorSet::new(cap));
        set.push(batch);
        set
    }

    pub fn replace(&mut self, employee_id: &str, batches: Vec<DescriptorBatch>) {
        if batches.is_empty() {
            self.sets.remove(employee_id);
        } else {
            self.sets
                .insert(employee_id.to_string(), DescriptorSet::from_batches(batches, self.cap));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DescriptorSet)> {
        self.sets.iter()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}
