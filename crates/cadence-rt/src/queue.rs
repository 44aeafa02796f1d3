//! Lock-free SPSC queues for crossing the control/realtime boundary.

use rtrb::{Consumer, Producer, PushError, RingBuffer};

#[derive(Debug, thiserror::Error)]
pub enum QueueError<T> {
    /// The queue had no free slot; the rejected value is handed back.
    #[error("queue is full")]
    Full(T),
}

impl<T> QueueError<T> {
    pub fn into_inner(self) -> T {
        match self {
            QueueError::Full(value) => value,
        }
    }
}

/// A bounded single-producer/single-consumer queue.
///
/// Neither side ever blocks or allocates after construction.
pub struct EventQueue;

impl EventQueue {
    #[allow(clippy::new_ret_no_self)]
    pub fn new<T>(capacity: usize) -> (EventSender<T>, EventReceiver<T>) {
        let (producer, consumer) = RingBuffer::new(capacity.max(1));
        (EventSender { producer }, EventReceiver { consumer })
    }
}

pub struct EventSender<T> {
    producer: Producer<T>,
}

impl<T> EventSender<T> {
    #[inline]
    pub fn try_push(&mut self, value: T) -> Result<(), QueueError<T>> {
        self.producer.push(value).map_err(|PushError::Full(value)| QueueError::Full(value))
    }

    /// Number of values that can be pushed right now.
    pub fn free_slots(&self) -> usize {
        self.producer.slots()
    }

    pub fn capacity(&self) -> usize {
        self.producer.buffer().capacity()
    }

    /// `true` once the receiving side has been dropped.
    pub fn is_abandoned(&self) -> bool {
        self.producer.is_abandoned()
    }
}

pub struct EventReceiver<T> {
    consumer: Consumer<T>,
}

impl<T> EventReceiver<T> {
    #[inline]
    pub fn try_pop(&mut self) -> Option<T> {
        self.consumer.pop().ok()
    }

    pub fn len(&self) -> usize {
        self.consumer.slots()
    }

    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.consumer.buffer().capacity()
    }
}
