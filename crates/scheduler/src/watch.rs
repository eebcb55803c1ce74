//! 任务事件订阅
//!
//! 基于 `tokio::sync::broadcast`：所有订阅者共享一个有界环形缓冲。
//! 订阅者落后超过容量时最早的未读事件被覆盖，下一次读取先交付一个
//! `Gap { dropped }` 标记。任务被删除时发送端关闭，流在排空剩余事件后结束。

use std::sync::{Mutex, MutexGuard};

use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use pulse_core::models::TaskEvent;

/// 单个任务的事件扇出
pub struct WatchHub {
    sender: Mutex<Option<broadcast::Sender<TaskEvent>>>,
}

impl WatchHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    fn sender(&self) -> MutexGuard<'_, Option<broadcast::Sender<TaskEvent>>> {
        self.sender.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self) -> TaskWatcher {
        TaskWatcher {
            receiver: self.sender().as_ref().map(broadcast::Sender::subscribe),
        }
    }

    pub fn publish(&self, event: TaskEvent) {
        if let Some(sender) = self.sender().as_ref() {
            // 没有订阅者时发送失败，直接丢弃
            let _ = sender.send(event);
        }
    }

    /// 关闭所有订阅，之后的订阅者立即结束
    pub fn close(&self) {
        self.sender().take();
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender()
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

/// 任务事件订阅者，drop 即取消订阅
pub struct TaskWatcher {
    receiver: Option<broadcast::Receiver<TaskEvent>>,
}

impl TaskWatcher {
    /// 等待下一个事件，订阅关闭且事件排空后返回 `None`
    pub async fn next(&mut self) -> Option<TaskEvent> {
        let receiver = self.receiver.as_mut()?;
        match receiver.recv().await {
            Ok(event) => Some(event),
            Err(RecvError::Lagged(dropped)) => Some(TaskEvent::Gap { dropped }),
            Err(RecvError::Closed) => {
                self.receiver = None;
                None
            }
        }
    }

    /// 取出当前已排队的全部事件
    pub fn drain(&mut self) -> Vec<TaskEvent> {
        let mut events = Vec::new();
        let Some(receiver) = self.receiver.as_mut() else {
            return events;
        };
        loop {
            match receiver.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Lagged(dropped)) => events.push(TaskEvent::Gap { dropped }),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        events
    }

    pub fn into_stream(self) -> impl Stream<Item = TaskEvent> + Send {
        futures::stream::unfold(self, |mut watcher| async move {
            watcher.next().await.map(|event| (event, watcher))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::StreamExt;
    use pulse_core::models::{TaskId, TaskState};

    use super::*;

    fn changed(to: TaskState) -> TaskEvent {
        TaskEvent::StateChanged {
            task_id: TaskId::from("t1"),
            from: TaskState::Stopped,
            to,
        }
    }

    #[tokio::test]
    async fn test_each_watcher_gets_own_copy() {
        let hub = WatchHub::new(8);
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        hub.publish(changed(TaskState::Spinning));

        assert_eq!(a.next().await, Some(changed(TaskState::Spinning)));
        assert_eq!(b.next().await, Some(changed(TaskState::Spinning)));
    }

    #[tokio::test]
    async fn test_slow_watcher_gets_gap_marker() {
        let hub = WatchHub::new(2);
        let mut watcher = hub.subscribe();

        hub.publish(changed(TaskState::Spinning));
        hub.publish(changed(TaskState::Running));
        hub.publish(changed(TaskState::Disabled));
        hub.publish(changed(TaskState::Ended));

        let events = watcher.drain();
        assert_eq!(
            events,
            vec![
                TaskEvent::Gap { dropped: 2 },
                changed(TaskState::Disabled),
                changed(TaskState::Ended),
            ]
        );
    }

    #[tokio::test]
    async fn test_close_ends_stream_after_drain() {
        let hub = WatchHub::new(8);
        let watcher = hub.subscribe();
        hub.publish(changed(TaskState::Spinning));
        hub.close();

        let events: Vec<TaskEvent> = watcher.into_stream().collect().await;
        assert_eq!(events, vec![changed(TaskState::Spinning)]);

        let mut late = hub.subscribe();
        assert_eq!(late.next().await, None);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let hub = WatchHub::new(8);
        let watcher = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);
        drop(watcher);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_next_wakes_on_publish() {
        let hub = Arc::new(WatchHub::new(8));
        let mut watcher = hub.subscribe();

        let publisher = hub.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            publisher.publish(changed(TaskState::Spinning));
        });

        assert_eq!(watcher.next().await, Some(changed(TaskState::Spinning)));
    }
}
