use std::collections::BTreeMap;

use crate::job::Job;

/// The shell's job table, tracking every launched pipeline by job id.
///
/// Ids are allocated as the smallest positive integer not currently in the
/// table, so a freed id is reused before a fresh one is handed out. The
/// backing map is ordered, which gives the ascending iteration every report
/// path relies on.
pub struct JobTable {
    jobs: BTreeMap<usize, Job>,
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTable {
    pub fn new() -> Self {
        Self {
            jobs: BTreeMap::new(),
        }
    }

    /// Insert a job under the smallest free id and return that id.
    pub fn add(&mut self, job: Job) -> usize {
        let mut id = 1;
        while self.jobs.contains_key(&id) {
            id += 1;
        }
        self.jobs.insert(id, job);
        id
    }

    pub fn get(&self, id: usize) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Job> {
        self.jobs.get_mut(&id)
    }

    pub fn remove(&mut self, id: usize) -> Option<Job> {
        self.jobs.remove(&id)
    }

    /// All job ids, ascending.
    pub fn ids(&self) -> Vec<usize> {
        self.jobs.keys().copied().collect()
    }

    /// Jobs in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Job)> {
        self.jobs.iter().map(|(id, job)| (*id, job))
    }
}
