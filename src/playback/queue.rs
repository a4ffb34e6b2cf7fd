//! Playback queue
//!
//! FIFO of received audio chunks with an Idle/Playing flag that acts as a
//! non-reentrant drain lock:
//!
//! - `enqueue` appends to the tail and schedules a drain if Idle
//! - `begin_drain` snapshots and clears every queued chunk into one batch and
//!   moves to Playing; it returns `None` while a batch is already playing
//! - `finish_drain` moves back to Idle and schedules another drain if chunks
//!   arrived in the meantime
//!
//! A scheduled drain is started by the session loop once it has consumed the
//! inbound messages already delivered, so a burst of chunks plays as one batch.

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing,
}

/// One drained playable unit. Chunks keep their boundaries so each can be
/// decoded on its own (every WAV chunk carries its own header).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackBatch {
    pub id: u64,
    pub chunks: Vec<Vec<u8>>,
}

impl PlaybackBatch {
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn byte_len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    /// Raw bytes of every chunk, in order
    pub fn concat(&self) -> Vec<u8> {
        self.chunks.concat()
    }
}

#[derive(Debug, Default)]
pub struct PlaybackQueue {
    state: PlaybackState,
    pending: VecDeque<Vec<u8>>,
    /// Batch currently playing
    playing: Option<u64>,
    next_batch_id: u64,
    drain_scheduled: bool,
    /// `end_of_audio` seen and nothing enqueued since
    producer_complete: bool,
    /// No further chunks accepted
    sealed: bool,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Number of queued, not yet drained chunks
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn playing_batch(&self) -> Option<u64> {
        self.playing
    }

    pub fn drain_scheduled(&self) -> bool {
        self.drain_scheduled
    }

    /// Append a chunk. Returns `true` if this scheduled a drain.
    pub fn enqueue(&mut self, chunk: Vec<u8>) -> bool {
        if self.sealed {
            log::debug!("PlaybackQueue: sealed, dropping {} byte chunk", chunk.len());
            return false;
        }
        self.pending.push_back(chunk);
        self.producer_complete = false;
        self.schedule_if_idle()
    }

    /// A new recording started: the next turn's audio has not finished yet
    pub fn begin_turn(&mut self) {
        self.producer_complete = false;
    }

    /// Producer finished this turn's audio. Returns `true` if this scheduled a drain.
    pub fn mark_producer_complete(&mut self) -> bool {
        self.producer_complete = true;
        self.schedule_if_idle()
    }

    fn schedule_if_idle(&mut self) -> bool {
        if self.state == PlaybackState::Idle && !self.drain_scheduled && !self.pending.is_empty() {
            self.drain_scheduled = true;
            return true;
        }
        false
    }

    /// Take every queued chunk as one batch and enter Playing.
    ///
    /// Returns `None` while Playing or when nothing is queued.
    pub fn begin_drain(&mut self) -> Option<PlaybackBatch> {
        self.drain_scheduled = false;
        if self.state == PlaybackState::Playing || self.pending.is_empty() {
            return None;
        }

        let chunks: Vec<Vec<u8>> = self.pending.drain(..).collect();
        let id = self.next_batch_id;
        self.next_batch_id += 1;
        self.state = PlaybackState::Playing;
        self.playing = Some(id);

        let batch = PlaybackBatch { id, chunks };
        log::debug!(
            "PlaybackQueue: draining batch {} ({} chunks, {} bytes)",
            id,
            batch.chunk_count(),
            batch.byte_len()
        );
        Some(batch)
    }

    /// Batch `id` finished (or failed). Returns `true` if another drain was scheduled.
    pub fn finish_drain(&mut self, id: u64) -> bool {
        if self.playing != Some(id) {
            log::debug!("PlaybackQueue: ignoring completion of stale batch {}", id);
            return false;
        }
        self.state = PlaybackState::Idle;
        self.playing = None;
        self.schedule_if_idle()
    }

    /// Nothing queued, nothing playing, and the producer has finished
    pub fn is_settled(&self) -> bool {
        self.producer_complete
            && self.pending.is_empty()
            && self.state == PlaybackState::Idle
            && !self.drain_scheduled
    }

    /// Refuse further chunks; already-queued audio may still drain
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Seal and drop every queued chunk. Returns the batch still playing, if any.
    pub fn discard(&mut self) -> Option<u64> {
        self.sealed = true;
        self.drain_scheduled = false;
        if !self.pending.is_empty() {
            log::info!("PlaybackQueue: discarding {} queued chunks", self.pending.len());
        }
        self.pending.clear();
        self.playing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_on_idle_schedules_drain() {
        let mut queue = PlaybackQueue::new();
        assert!(queue.enqueue(vec![1]));
        // Already scheduled
        assert!(!queue.enqueue(vec![2]));
        assert!(queue.drain_scheduled());
    }

    #[test]
    fn test_burst_drains_as_one_batch_in_order() {
        let mut queue = PlaybackQueue::new();
        queue.enqueue(vec![1, 2]);
        queue.enqueue(vec![3]);
        queue.mark_producer_complete();

        let batch = queue.begin_drain().unwrap();
        assert_eq!(batch.chunk_count(), 2);
        assert_eq!(batch.chunks, vec![vec![1, 2], vec![3]]);
        assert_eq!(batch.concat(), vec![1, 2, 3]);
        assert_eq!(queue.state(), PlaybackState::Playing);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_no_overlapping_drains() {
        let mut queue = PlaybackQueue::new();
        queue.enqueue(vec![1]);
        let first = queue.begin_drain().unwrap();

        // Arrives while playing: queued, no drain scheduled
        assert!(!queue.enqueue(vec![2]));
        assert!(queue.begin_drain().is_none());

        // Completion schedules the next drain
        assert!(queue.finish_drain(first.id));
        let second = queue.begin_drain().unwrap();
        assert_eq!(second.concat(), vec![2]);
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_play_order_matches_enqueue_order() {
        let mut queue = PlaybackQueue::new();
        let mut played = Vec::new();

        for chunk in 0u8..10 {
            queue.enqueue(vec![chunk]);
            // Drain every third chunk, finishing playback in between
            if chunk % 3 == 2 {
                if let Some(batch) = queue.begin_drain() {
                    played.extend(batch.concat());
                    queue.finish_drain(batch.id);
                }
            }
        }
        while let Some(batch) = queue.begin_drain() {
            played.extend(batch.concat());
            queue.finish_drain(batch.id);
        }

        assert_eq!(played, (0u8..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_failed_batch_moves_on() {
        let mut queue = PlaybackQueue::new();
        queue.enqueue(vec![1]);
        let bad = queue.begin_drain().unwrap();
        queue.enqueue(vec![2]);

        // Playback error is reported the same way as completion
        assert!(queue.finish_drain(bad.id));
        assert_eq!(queue.begin_drain().unwrap().concat(), vec![2]);
    }

    #[test]
    fn test_stale_completion_ignored() {
        let mut queue = PlaybackQueue::new();
        queue.enqueue(vec![1]);
        let batch = queue.begin_drain().unwrap();

        assert!(!queue.finish_drain(batch.id + 7));
        assert_eq!(queue.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_settled() {
        let mut queue = PlaybackQueue::new();
        assert!(!queue.is_settled());

        queue.enqueue(vec![1]);
        queue.mark_producer_complete();
        assert!(!queue.is_settled());

        let batch = queue.begin_drain().unwrap();
        assert!(!queue.is_settled());
        queue.finish_drain(batch.id);
        assert!(queue.is_settled());

        // New audio reopens the turn
        queue.enqueue(vec![2]);
        assert!(!queue.is_settled());
    }

    #[test]
    fn test_end_of_audio_with_nothing_queued_is_settled() {
        let mut queue = PlaybackQueue::new();
        assert!(!queue.mark_producer_complete());
        assert!(queue.is_settled());
    }

    #[test]
    fn test_begin_turn_unsettles() {
        let mut queue = PlaybackQueue::new();
        queue.mark_producer_complete();
        assert!(queue.is_settled());

        queue.begin_turn();
        assert!(!queue.is_settled());
    }

    #[test]
    fn test_discard() {
        let mut queue = PlaybackQueue::new();
        queue.enqueue(vec![1]);
        let batch = queue.begin_drain().unwrap();
        queue.enqueue(vec![2]);
        queue.enqueue(vec![3]);

        assert_eq!(queue.discard(), Some(batch.id));
        assert!(queue.is_empty());
        assert!(!queue.enqueue(vec![4]));
        assert!(!queue.finish_drain(batch.id));
        assert!(queue.begin_drain().is_none());
    }

    #[test]
    fn test_seal_lets_queued_audio_finish() {
        let mut queue = PlaybackQueue::new();
        queue.enqueue(vec![1]);
        queue.seal();
        assert!(!queue.enqueue(vec![2]));

        let batch = queue.begin_drain().unwrap();
        assert_eq!(batch.concat(), vec![1]);
    }
}
