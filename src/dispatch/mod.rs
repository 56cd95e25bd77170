//! Dispatch batcher
//!
//! Splits an ordered item list into channel sends and captures the
//! references the channel assigns, in delivery order.

/// Caption rendering
pub mod caption;
/// Delivery channel capability
pub mod channel;

use std::ops::Range;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::cache::CachedMedia;
use crate::config::{MEDIA_GROUP_LIMIT, OVERSIZED_PAUSE, OVERSIZED_SENDS_PER_PAUSE};
use crate::error::PipelineError;

pub use channel::{DeliveryChannel, DeliveryError, MediaSource, OutgoingMedia};

/// Splits `count` items into consecutive sends of at most `limit` items.
///
/// A one-element range is sent as a single item, anything longer as a group.
#[must_use]
pub fn plan_batches(count: usize, limit: usize) -> Vec<Range<usize>> {
    let limit = limit.max(1);
    (0..count)
        .step_by(limit)
        .map(|start| start..(start + limit).min(count))
        .collect()
}

/// Sends items through a [`DeliveryChannel`] under the batching policy
#[derive(Debug, Clone)]
pub struct Dispatcher {
    group_limit: usize,
    sends_per_pause: usize,
    pause: Duration,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(MEDIA_GROUP_LIMIT, OVERSIZED_SENDS_PER_PAUSE, OVERSIZED_PAUSE)
    }
}

impl Dispatcher {
    /// Creates a dispatcher
    #[must_use]
    pub fn new(group_limit: usize, sends_per_pause: usize, pause: Duration) -> Self {
        Self {
            group_limit: group_limit.max(1),
            sends_per_pause: sends_per_pause.max(1),
            pause,
        }
    }

    /// Delivers `items` in order. `caption` goes on the first item only.
    ///
    /// Items already sent are not rolled back when a later send fails.
    ///
    /// # Errors
    ///
    /// [`PipelineError::StaleReference`] if the channel rejects a stored
    /// reference, [`PipelineError::SendFailure`] for any other send failure.
    pub async fn deliver(
        &self,
        channel: &dyn DeliveryChannel,
        mut items: Vec<OutgoingMedia>,
        caption: Option<String>,
    ) -> Result<Vec<CachedMedia>, PipelineError> {
        if let Some(first) = items.first_mut() {
            first.caption = caption;
        }

        let batches = plan_batches(items.len(), self.group_limit);
        let oversized = batches.len() > 1;
        let mut delivered = Vec::with_capacity(items.len());

        for (sent, range) in batches.into_iter().enumerate() {
            if oversized && sent > 0 && sent % self.sends_per_pause == 0 {
                debug!(pause = ?self.pause, sent, "Pausing between sends");
                tokio::time::sleep(self.pause).await;
            }

            let chunk = &items[range.clone()];
            let refs = if let [item] = chunk {
                channel.send_single(item).await.map(|r| vec![r])
            } else {
                channel.send_batch(chunk).await
            }
            .map_err(|e| {
                let start = range.start;
                match e {
                    DeliveryError::StaleReference => {
                        warn!(start, "Channel rejected a stored reference");
                        PipelineError::StaleReference
                    }
                    DeliveryError::Failed(msg) => {
                        error!(start, len = chunk.len(), error = %msg, "Send failed");
                        PipelineError::SendFailure(msg)
                    }
                }
            })?;

            if refs.len() != chunk.len() {
                error!(
                    expected = chunk.len(),
                    got = refs.len(),
                    "Channel returned an unexpected number of references"
                );
                return Err(PipelineError::SendFailure(format!(
                    "expected {} references, got {}",
                    chunk.len(),
                    refs.len()
                )));
            }

            delivered.extend(chunk.iter().zip(refs).map(|(item, reference)| CachedMedia {
                reference,
                kind: item.kind,
            }));
        }

        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::MediaKind;
    use channel::MockDeliveryChannel;
    use mockall::predicate::function;
    use mockall::Sequence;

    fn uploads(n: usize) -> Vec<OutgoingMedia> {
        (0..n)
            .map(|i| {
                OutgoingMedia::new(
                    if i % 2 == 0 { MediaKind::Photo } else { MediaKind::Video },
                    MediaSource::Upload(format!("{i:03}.bin").into()),
                )
            })
            .collect()
    }

    fn refs_for(items: &[OutgoingMedia]) -> Vec<String> {
        items
            .iter()
            .map(|item| match &item.source {
                MediaSource::Upload(p) => format!("id-{}", p.display()),
                MediaSource::Reference(r) => r.clone(),
            })
            .collect()
    }

    fn instant() -> Dispatcher {
        Dispatcher::new(10, 3, Duration::ZERO)
    }

    #[test]
    fn test_plan_batches() {
        assert!(plan_batches(0, 10).is_empty());
        assert_eq!(plan_batches(1, 10), vec![0..1]);
        assert_eq!(plan_batches(7, 10), vec![0..7]);
        assert_eq!(plan_batches(10, 10), vec![0..10]);
        assert_eq!(plan_batches(12, 10), vec![0..10, 10..12]);
        assert_eq!(plan_batches(21, 10), vec![0..10, 10..20, 20..21]);
    }

    #[tokio::test]
    async fn test_single_item_goes_through_send_single_with_caption() {
        let mut channel = MockDeliveryChannel::new();
        channel
            .expect_send_single()
            .with(function(|m: &OutgoingMedia| m.caption.as_deref() == Some("cap")))
            .times(1)
            .returning(|_| Ok("ref-0".to_string()));
        channel.expect_send_batch().never();

        let delivered = instant()
            .deliver(&channel, uploads(1), Some("cap".to_string()))
            .await
            .unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].reference, "ref-0");
        assert_eq!(delivered[0].kind, MediaKind::Photo);
    }

    #[tokio::test]
    async fn test_twelve_items_are_ten_plus_two_with_one_caption() {
        let mut seq = Sequence::new();
        let mut channel = MockDeliveryChannel::new();
        channel
            .expect_send_batch()
            .withf(|items| {
                items.len() == 10
                    && items[0].caption.as_deref() == Some("cap")
                    && items[1..].iter().all(|i| i.caption.is_none())
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|items| Ok(refs_for(items)));
        channel
            .expect_send_batch()
            .withf(|items| items.len() == 2 && items.iter().all(|i| i.caption.is_none()))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|items| Ok(refs_for(items)));

        let delivered = instant()
            .deliver(&channel, uploads(12), Some("cap".to_string()))
            .await
            .unwrap();
        let refs: Vec<_> = delivered.iter().map(|d| d.reference.clone()).collect();
        assert_eq!(refs, refs_for(&uploads(12)));
    }

    #[tokio::test]
    async fn test_trailing_single_item_is_sent_alone() {
        let mut channel = MockDeliveryChannel::new();
        channel
            .expect_send_batch()
            .times(1)
            .returning(|items| Ok(refs_for(items)));
        channel
            .expect_send_single()
            .with(function(|m: &OutgoingMedia| m.caption.is_none()))
            .times(1)
            .returning(|_| Ok("last".to_string()));

        let delivered = instant()
            .deliver(&channel, uploads(11), Some("cap".to_string()))
            .await
            .unwrap();
        assert_eq!(delivered.len(), 11);
        assert_eq!(delivered[10].reference, "last");
    }

    #[tokio::test]
    async fn test_stale_reference_is_distinguished() {
        let mut channel = MockDeliveryChannel::new();
        channel
            .expect_send_batch()
            .returning(|_| Err(DeliveryError::StaleReference));

        let err = instant()
            .deliver(&channel, uploads(3), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::StaleReference));
    }

    #[tokio::test]
    async fn test_failure_stops_without_rollback() {
        let mut seq = Sequence::new();
        let mut channel = MockDeliveryChannel::new();
        channel
            .expect_send_batch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|items| Ok(refs_for(items)));
        channel
            .expect_send_batch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(DeliveryError::Failed("file too big".to_string())));

        let err = instant()
            .deliver(&channel, uploads(15), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::SendFailure(msg) if msg == "file too big"));
    }

    #[tokio::test]
    async fn test_reference_count_mismatch_is_send_failure() {
        let mut channel = MockDeliveryChannel::new();
        channel
            .expect_send_batch()
            .returning(|_| Ok(vec!["only-one".to_string()]));

        let err = instant()
            .deliver(&channel, uploads(2), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::SendFailure(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_run_pauses_after_three_sends() {
        let mut channel = MockDeliveryChannel::new();
        channel
            .expect_send_batch()
            .times(4)
            .returning(|items| Ok(refs_for(items)));

        let dispatcher = Dispatcher::new(2, 3, Duration::from_secs(1));
        let started = tokio::time::Instant::now();
        dispatcher
            .deliver(&channel, uploads(8), None)
            .await
            .unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(2));
    }
}
