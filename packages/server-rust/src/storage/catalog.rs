use std::collections::HashMap;

use async_trait::async_trait;
use relay_core::Receiver;

use crate::traits::ReceiverCatalog;

/// Receivers fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct StaticReceiverCatalog {
    receivers: HashMap<String, Receiver>,
}

impl StaticReceiverCatalog {
    pub fn new(receivers: impl IntoIterator<Item = Receiver>) -> Self {
        Self {
            receivers: receivers
                .into_iter()
                .map(|receiver| (receiver.full_name.clone(), receiver))
                .collect(),
        }
    }

    /// Receiver names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.receivers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ReceiverCatalog for StaticReceiverCatalog {
    async fn find_receiver(&self, full_name: &str) -> anyhow::Result<Option<Receiver>> {
        Ok(self.receivers.get(full_name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use relay_core::TransportConfig;

    use super::*;

    #[tokio::test]
    async fn finds_by_full_name() {
        let catalog = StaticReceiverCatalog::new([
            Receiver::new("b.two", None),
            Receiver::new("a.one", Some(TransportConfig::Null)),
        ]);
        assert_eq!(catalog.names(), vec!["a.one", "b.two"]);

        let found = catalog.find_receiver("a.one").await.unwrap().unwrap();
        assert_eq!(found.transport, Some(TransportConfig::Null));
        assert!(catalog.find_receiver("c.three").await.unwrap().is_none());
    }
}
