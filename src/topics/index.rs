use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("topic {topic} is already bound to {owner}, refusing to bind it to {requested}")]
    TopicConflict {
        topic: String,
        owner: String,
        requested: String,
    },
}

/// Topic → address index.
///
/// Many topics may point at one address, a topic never points at two.
/// Bind order is kept so subscriptions go out in configuration order.
#[derive(Debug, Default, Clone)]
pub struct TopicIndex {
    owners: HashMap<String, String>,
    order: Vec<String>,
}

impl TopicIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds every topic to `address`, or none of them on conflict.
    pub fn bind<I, S>(&mut self, address: &str, topics: I) -> Result<(), RegistryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let topics: Vec<String> = topics.into_iter().map(Into::into).collect();

        if let Some((topic, owner)) = topics.iter().find_map(|topic| {
            self.owners
                .get(topic)
                .filter(|owner| owner.as_str() != address)
                .map(|owner| (topic, owner))
        }) {
            return Err(RegistryError::TopicConflict {
                topic: topic.clone(),
                owner: owner.clone(),
                requested: address.to_string(),
            });
        }

        for topic in topics {
            if self.owners.contains_key(&topic) {
                continue;
            }
            debug!("bind {topic} -> {address}");
            self.owners.insert(topic.clone(), address.to_string());
            self.order.push(topic);
        }
        Ok(())
    }

    /// Removes every topic bound to `address` and returns them.
    pub fn unbind(&mut self, address: &str) -> Vec<String> {
        let mut removed = Vec::new();
        self.order.retain(|topic| {
            if self.owners.get(topic).map(String::as_str) == Some(address) {
                removed.push(topic.clone());
                false
            } else {
                true
            }
        });
        for topic in &removed {
            debug!("unbind {topic} -> {address}");
            self.owners.remove(topic);
        }
        removed
    }

    pub fn lookup(&self, topic: &str) -> Option<&str> {
        self.owners.get(topic).map(String::as_str)
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn topics_of<'a>(&'a self, address: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.topics()
            .filter(move |topic| self.lookup(topic) == Some(address))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_and_lookup() {
        let mut index = TopicIndex::new();
        index
            .bind("dimmer1", ["stat/d1/POWER", "stat/d1/RESULT"])
            .unwrap();

        assert_eq!(index.lookup("stat/d1/RESULT"), Some("dimmer1"));
        assert_eq!(index.lookup("stat/other"), None);
        assert_eq!(
            index.topics().collect::<Vec<_>>(),
            ["stat/d1/POWER", "stat/d1/RESULT"]
        );
    }

    #[test]
    fn rebinding_same_owner_is_idempotent() {
        let mut index = TopicIndex::new();
        index.bind("a", ["t/1"]).unwrap();
        index.bind("a", ["t/1", "t/2"]).unwrap();

        assert_eq!(index.len(), 2);
    }

    #[test]
    fn conflicting_bind_changes_nothing() {
        let mut index = TopicIndex::new();
        index.bind("a", ["t/1"]).unwrap();

        let err = index.bind("b", ["t/2", "t/1"]).unwrap_err();

        assert_eq!(
            err,
            RegistryError::TopicConflict {
                topic: "t/1".into(),
                owner: "a".into(),
                requested: "b".into(),
            }
        );
        assert_eq!(index.lookup("t/2"), None);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn unbind_removes_every_topic_of_the_address() {
        let mut index = TopicIndex::new();
        index.bind("a", ["t/a1", "t/a2", "t/a3"]).unwrap();
        index.bind("b", ["t/b1"]).unwrap();

        let removed = index.unbind("a");

        assert_eq!(removed, ["t/a1", "t/a2", "t/a3"]);
        assert_eq!(index.topics().collect::<Vec<_>>(), ["t/b1"]);
        assert!(index.unbind("a").is_empty());
    }
}
