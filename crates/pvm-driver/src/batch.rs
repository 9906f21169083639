//! Ordered configuration writes.

use crate::error::{CoreError, Result};
use crate::locator::VmLocator;
use crate::supervisor::TaskSupervisor;

/// A list of `key=value` writes applied one supervised task at a time.
///
/// Writes are not transactional. A failure leaves every earlier write in
/// place; [`applied`](Self::applied) tells how far the batch got, and calling
/// [`apply`](Self::apply) again resumes from the first unapplied entry.
#[derive(Debug, Clone, Default)]
pub struct ConfigBatch {
    entries: Vec<(String, String)>,
    applied: usize,
}

impl ConfigBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    /// Like [`set`](Self::set), but an empty value leaves the key untouched.
    pub fn set_if_present(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        if value.is_empty() {
            self
        } else {
            self.set(key, value)
        }
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of writes that have succeeded.
    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Writes still to be made.
    pub fn pending(&self) -> &[(String, String)] {
        &self.entries[self.applied..]
    }

    pub fn is_complete(&self) -> bool {
        self.applied == self.entries.len()
    }

    /// Apply the pending writes in order.
    ///
    /// # Errors
    ///
    /// [`CoreError::ConfigApply`] naming the key that failed and how many
    /// writes of the batch had succeeded.
    pub async fn apply(&mut self, locator: &VmLocator, supervisor: &TaskSupervisor) -> Result<()> {
        while let Some((key, value)) = self.entries.get(self.applied) {
            tracing::debug!(vmid = %locator.vmid(), key = %key, value = %value, "Applying config");

            let result = async {
                let vm = locator.fetch().await?;
                supervisor.run(key, vm.apply_config(key, value)).await
            }
            .await;

            if let Err(source) = result {
                return Err(CoreError::ConfigApply {
                    key: key.clone(),
                    applied: self.applied,
                    source: Box::new(source),
                });
            }
            self.applied += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_if_present_skips_empty() {
        let batch = ConfigBatch::new()
            .set("agent", "1")
            .set_if_present("cpu", "")
            .set_if_present("cores", "4");
        let keys: Vec<&str> = batch.entries().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["agent", "cores"]);
        assert_eq!(batch.pending().len(), 2);
        assert!(!batch.is_complete());
    }

    #[test]
    fn test_empty_batch_is_complete() {
        let batch = ConfigBatch::new();
        assert!(batch.is_empty());
        assert!(batch.is_complete());
    }
}
