//! Batches and context groups

use crate::task::CorrectionTask;
use quill_core::ContextGrouping;

/// Tasks drained from the queue together, in priority order.
#[derive(Debug)]
pub struct Batch {
    id: u64,
    tasks: Vec<CorrectionTask>,
}

impl Batch {
    pub fn new(id: u64, tasks: Vec<CorrectionTask>) -> Self {
        Self { id, tasks }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> &[CorrectionTask] {
        &self.tasks
    }

    /// Split into groups by context key.
    ///
    /// Groups keep the order in which their key first appears; tasks keep
    /// batch order inside a group.
    pub fn into_groups(self, grouping: &ContextGrouping) -> Vec<ContextGroup> {
        let mut groups: Vec<ContextGroup> = Vec::new();
        for task in self.tasks {
            let key = group_key(grouping, &task);
            match groups.iter_mut().find(|g| g.key == key) {
                Some(group) => group.tasks.push(task),
                None => groups.push(ContextGroup {
                    key,
                    tasks: vec![task],
                }),
            }
        }
        groups
    }
}

fn group_key(grouping: &ContextGrouping, task: &CorrectionTask) -> String {
    match grouping {
        ContextGrouping::LeadingTokens { count } => task
            .context
            .split_whitespace()
            .take(*count)
            .collect::<Vec<_>>()
            .join(" "),
        ContextGrouping::Exact => task.context.clone(),
        ContextGrouping::PerTask => format!("#{}", task.seq),
    }
}

/// Tasks of one batch sharing a context key.
#[derive(Debug)]
pub struct ContextGroup {
    pub key: String,
    pub tasks: Vec<CorrectionTask>,
}

impl ContextGroup {
    /// Distinct contexts of the group joined by single spaces.
    pub fn combined_context(&self) -> String {
        let mut seen: Vec<&str> = Vec::new();
        for task in &self.tasks {
            if !seen.contains(&task.context.as_str()) {
                seen.push(&task.context);
            }
        }
        seen.join(" ")
    }

    /// Distinct words of the group's non-cancelled tasks, first occurrence
    /// order.
    pub fn pending_words(&self) -> Vec<String> {
        let mut words: Vec<String> = Vec::new();
        for task in self.tasks.iter().filter(|t| !t.is_cancelled()) {
            if !words.contains(&task.word) {
                words.push(task.word.clone());
            }
        }
        words
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn task(seq: u64, word: &str, context: &str) -> CorrectionTask {
        CorrectionTask::new(
            word.into(),
            context.into(),
            1,
            seq,
            Instant::now(),
            Box::new(|_, _| {}),
        )
    }

    fn batch() -> Batch {
        Batch::new(
            7,
            vec![
                task(0, "qe", "creo qe esto es"),
                task(1, "kiero", "yo kiero ir"),
                task(2, "esto", "creo qe esto va bien"),
                task(3, "qe", "creo qe esto es"),
            ],
        )
    }

    #[test]
    fn test_leading_tokens_grouping() {
        let groups = batch().into_groups(&ContextGrouping::LeadingTokens { count: 3 });
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, "creo qe esto");
        assert_eq!(groups[0].tasks.len(), 3);
        assert_eq!(groups[1].key, "yo kiero ir");
    }

    #[test]
    fn test_exact_grouping() {
        let groups = batch().into_groups(&ContextGrouping::Exact);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].tasks.len(), 2);
    }

    #[test]
    fn test_per_task_grouping() {
        let groups = batch().into_groups(&ContextGrouping::PerTask);
        assert_eq!(groups.len(), 4);
    }

    #[test]
    fn test_combined_context_and_pending_words() {
        let groups = batch().into_groups(&ContextGrouping::LeadingTokens { count: 3 });
        let group = &groups[0];
        assert_eq!(
            group.combined_context(),
            "creo qe esto es creo qe esto va bien"
        );
        assert_eq!(group.pending_words(), vec!["qe".to_string(), "esto".to_string()]);

        group.tasks[0].handle().cancel();
        group.tasks[2].handle().cancel();
        assert_eq!(group.pending_words(), vec!["esto".to_string()]);
    }

    #[test]
    fn test_short_context_key() {
        let groups = Batch::new(0, vec![task(0, "a", "uno"), task(1, "b", "uno ")])
            .into_groups(&ContextGrouping::default());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].key, "uno");
    }
}
