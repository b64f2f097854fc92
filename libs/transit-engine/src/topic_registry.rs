use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use transit_api::{BrokerAdmin, ClientError, NewTopic};

use crate::error::EngineError;

/// How long a metadata listing may take before it counts as failed.
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

/// Process-wide memo of topics known to exist on the broker.
///
/// Share one registry between all producers of a process (it is cheap to
/// clone). Once a name is recorded it is never checked against the broker
/// again.
#[derive(Clone)]
pub struct TopicRegistry {
    admin: Arc<dyn BrokerAdmin>,
    known: Arc<Mutex<HashSet<String>>>,
}

impl TopicRegistry {
    pub fn new(admin: Arc<dyn BrokerAdmin>) -> Self {
        Self {
            admin,
            known: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn known(&self) -> MutexGuard<'_, HashSet<String>> {
        self.known.lock().unwrap_or_else(|e| {
            tracing::warn!("topic registry lock was poisoned, recovering");
            e.into_inner()
        })
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.known().contains(name)
    }

    /// Make sure `name` exists, creating it if needed.
    pub async fn ensure_exists(&self, name: &str, partitions: i32, replicas: i32) -> Result<(), EngineError> {
        let topic = NewTopic {
            name: name.to_string(),
            partitions,
            replicas,
        };
        match self.ensure_all(vec![topic]).await.pop() {
            Some((_, result)) => result,
            None => Ok(()),
        }
    }

    /// Batch form of [`ensure_exists`](Self::ensure_exists). Every requested
    /// topic gets its own result; one failure does not affect the others.
    pub async fn ensure_all(&self, topics: Vec<NewTopic>) -> Vec<(String, Result<(), EngineError>)> {
        let (known, unknown): (Vec<NewTopic>, Vec<NewTopic>) =
            topics.into_iter().partition(|t| self.is_known(&t.name));

        let mut results: Vec<(String, Result<(), EngineError>)> =
            known.into_iter().map(|t| (t.name, Ok(()))).collect();
        if unknown.is_empty() {
            return results;
        }

        let existing: HashSet<String> = match tokio::time::timeout(
            METADATA_TIMEOUT,
            self.admin.list_topics(METADATA_TIMEOUT),
        )
        .await
        {
            Ok(Ok(names)) => names.into_iter().collect(),
            Ok(Err(e)) => return fail_all(results, unknown, e),
            Err(_) => {
                let e = ClientError::timeout(format!("metadata listing exceeded {METADATA_TIMEOUT:?}"));
                return fail_all(results, unknown, e);
            }
        };

        let (present, missing): (Vec<NewTopic>, Vec<NewTopic>) =
            unknown.into_iter().partition(|t| existing.contains(&t.name));

        for topic in present {
            tracing::info!(topic = %topic.name, "topic already exists");
            self.known().insert(topic.name.clone());
            results.push((topic.name, Ok(())));
        }

        if missing.is_empty() {
            return results;
        }

        for (name, outcome) in self.admin.create_topics(missing).await {
            match outcome {
                Ok(()) => {
                    tracing::info!(topic = %name, "topic created");
                    self.known().insert(name.clone());
                    results.push((name, Ok(())));
                }
                Err(e) => {
                    tracing::error!(topic = %name, error = %e, "failed to create topic");
                    results.push((name.clone(), Err(EngineError::TopicCreation { topic: name, source: e })));
                }
            }
        }
        results
    }
}

fn fail_all(
    mut results: Vec<(String, Result<(), EngineError>)>,
    topics: Vec<NewTopic>,
    error: ClientError,
) -> Vec<(String, Result<(), EngineError>)> {
    tracing::error!(error = %error, "could not list broker topics");
    for topic in topics {
        results.push((
            topic.name,
            Err(EngineError::Client(error.clone().with_context("list topics"))),
        ));
    }
    results
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Admin double that counts broker round trips.
    #[derive(Default)]
    struct CountingAdmin {
        existing: Mutex<HashSet<String>>,
        rejected: HashSet<String>,
        list_calls: AtomicUsize,
        create_calls: AtomicUsize,
        unreachable: bool,
    }

    impl BrokerAdmin for CountingAdmin {
        fn list_topics(
            &self,
            _timeout: Duration,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, ClientError>> + Send + '_>> {
            Box::pin(async move {
                self.list_calls.fetch_add(1, Ordering::SeqCst);
                if self.unreachable {
                    return Err(ClientError::io("connection refused"));
                }
                Ok(self.existing.lock().unwrap().iter().cloned().collect())
            })
        }

        fn create_topics(
            &self,
            topics: Vec<NewTopic>,
        ) -> Pin<Box<dyn Future<Output = Vec<(String, Result<(), ClientError>)>> + Send + '_>> {
            Box::pin(async move {
                self.create_calls.fetch_add(1, Ordering::SeqCst);
                topics
                    .into_iter()
                    .map(|t| {
                        if self.rejected.contains(&t.name) {
                            (t.name, Err(ClientError::logic("policy violation")))
                        } else {
                            self.existing.lock().unwrap().insert(t.name.clone());
                            (t.name, Ok(()))
                        }
                    })
                    .collect()
            })
        }
    }

    fn topic(name: &str) -> NewTopic {
        NewTopic {
            name: name.into(),
            partitions: 1,
            replicas: 1,
        }
    }

    #[tokio::test]
    async fn second_call_skips_the_broker() {
        let admin = Arc::new(CountingAdmin::default());
        let registry = TopicRegistry::new(admin.clone());

        registry.ensure_exists("stations", 1, 1).await.unwrap();
        registry.ensure_exists("stations", 1, 1).await.unwrap();

        assert_eq!(admin.list_calls.load(Ordering::SeqCst), 1);
        assert_eq!(admin.create_calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_known("stations"));
    }

    #[tokio::test]
    async fn existing_topic_is_not_recreated() {
        let admin = Arc::new(CountingAdmin::default());
        admin.existing.lock().unwrap().insert("arrivals".into());
        let registry = TopicRegistry::new(admin.clone());

        registry.ensure_exists("arrivals", 1, 1).await.unwrap();

        assert_eq!(admin.create_calls.load(Ordering::SeqCst), 0);
        assert!(registry.is_known("arrivals"));
    }

    #[tokio::test]
    async fn clones_share_the_known_set() {
        let admin = Arc::new(CountingAdmin::default());
        let a = TopicRegistry::new(admin.clone());
        let b = a.clone();

        a.ensure_exists("weather", 1, 1).await.unwrap();
        b.ensure_exists("weather", 1, 1).await.unwrap();

        assert_eq!(admin.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn creation_failure_is_reported_per_topic() {
        let admin = Arc::new(CountingAdmin {
            rejected: HashSet::from(["bad".to_string()]),
            ..Default::default()
        });
        let registry = TopicRegistry::new(admin.clone());

        let results = registry.ensure_all(vec![topic("good"), topic("bad")]).await;

        assert_eq!(results.len(), 2);
        for (name, result) in &results {
            match name.as_str() {
                "good" => assert!(result.is_ok()),
                "bad" => assert!(matches!(result, Err(EngineError::TopicCreation { .. }))),
                other => panic!("unexpected topic {other}"),
            }
        }
        assert!(registry.is_known("good"));
        assert!(!registry.is_known("bad"));
    }

    #[tokio::test]
    async fn unreachable_broker_fails_without_memoizing() {
        let admin = Arc::new(CountingAdmin {
            unreachable: true,
            ..Default::default()
        });
        let registry = TopicRegistry::new(admin.clone());

        assert!(matches!(
            registry.ensure_exists("lines", 1, 1).await,
            Err(EngineError::Client(_))
        ));
        assert!(!registry.is_known("lines"));
        assert_eq!(admin.create_calls.load(Ordering::SeqCst), 0);
    }
}
