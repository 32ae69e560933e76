use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use crate::cursor::row_cursor::Position;

/// 一次定位尝试的类型
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CursorMove {
    Next,
    Previous,
    First,
    Last,
    Absolute(i64),
    BeforeFirst,
    AfterLast,
}

/// “游标移动”通知
///
/// 每次定位尝试都会发出，无论成功与否；`succeeded` 与 `position` 描述尝试之后的状态。
#[derive(Clone, Debug, PartialEq)]
pub struct CursorEvent {
    pub movement: CursorMove,
    pub succeeded: bool,
    pub position: Position,
}

pub type ListenerId = u64;

/// 每个订阅者最多积压的事件数；满了丢新事件
pub const SUBSCRIBER_CAPACITY: usize = 256;

type Callback = Box<dyn Fn(&CursorEvent) + Send + Sync>;

/// 显式回调列表 + channel 订阅者
#[derive(Default)]
pub struct Listeners {
    next_id: ListenerId,
    callbacks: Vec<(ListenerId, Callback)>,
    subscribers: Vec<Sender<CursorEvent>>,
}

impl Listeners {
    pub fn add<F>(&mut self, f: F) -> ListenerId
    where
        F: Fn(&CursorEvent) + Send + Sync + 'static,
    {
        self.next_id += 1;
        self.callbacks.push((self.next_id, Box::new(f)));
        self.next_id
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|(i, _)| *i != id);
        before != self.callbacks.len()
    }

    pub fn subscribe(&mut self) -> Receiver<CursorEvent> {
        let (tx, rx) = channel::bounded(SUBSCRIBER_CAPACITY);
        self.subscribers.push(tx);
        rx
    }

    pub fn len(&self) -> usize {
        self.callbacks.len() + self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn emit(&mut self, event: &CursorEvent) {
        for (_, cb) in &self.callbacks {
            cb(event);
        }
        // 接收端已 drop 的订阅者在这里顺手清掉；不读的订阅者只会丢事件
        self.subscribers
            .retain(|tx| !matches!(tx.try_send(event.clone()), Err(TrySendError::Disconnected(_))));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn ev(m: CursorMove) -> CursorEvent {
        CursorEvent {
            movement: m,
            succeeded: false,
            position: Position::BeforeFirst,
        }
    }

    #[test]
    fn remove_listener_stops_callbacks() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut l = Listeners::default();
        let h = hits.clone();
        let id = l.add(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        l.emit(&ev(CursorMove::Next));
        assert!(l.remove(id));
        assert!(!l.remove(id));
        l.emit(&ev(CursorMove::Next));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let mut l = Listeners::default();
        let keep = l.subscribe();
        let gone = l.subscribe();
        drop(gone);
        l.emit(&ev(CursorMove::First));
        assert_eq!(l.len(), 1);
        assert_eq!(keep.try_recv().unwrap().movement, CursorMove::First);
    }

    #[test]
    fn undrained_subscriber_is_capped() {
        let mut l = Listeners::default();
        let rx = l.subscribe();
        for _ in 0..SUBSCRIBER_CAPACITY + 50 {
            l.emit(&ev(CursorMove::Next));
        }
        assert_eq!(rx.len(), SUBSCRIBER_CAPACITY);
        assert_eq!(l.len(), 1);
        // 读掉之后继续收新事件
        while rx.try_recv().is_ok() {}
        l.emit(&ev(CursorMove::Last));
        assert_eq!(rx.try_recv().unwrap().movement, CursorMove::Last);
    }
}
