use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::message::WsMessage;

/// 용량 초과로 거부된 메시지
#[derive(Debug)]
pub struct QueueFull(pub WsMessage);

/// 세션 수신 큐
///
/// 가득 차면 오래된 메시지를 버리지 않고 push를 거부한다.
/// 세션은 거부를 받으면 종료 레코드를 넣고 스스로 실패 처리한다.
pub struct InboundQueue {
    messages: Mutex<VecDeque<WsMessage>>,
    capacity: usize,
    notify: Notify,
}

impl InboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            notify: Notify::new(),
        }
    }

    pub fn push(&self, msg: WsMessage) -> Result<(), QueueFull> {
        {
            let mut messages = self.messages.lock();
            if messages.len() >= self.capacity {
                return Err(QueueFull(msg));
            }
            messages.push_back(msg);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// 종료 레코드는 용량과 무관하게 항상 넣는다
    pub fn push_terminal(&self, msg: WsMessage) {
        self.messages.lock().push_back(msg);
        self.notify.notify_waiters();
    }

    pub fn try_pop(&self) -> Option<WsMessage> {
        self.messages.lock().pop_front()
    }

    /// 메시지가 들어올 때까지 대기
    pub async fn pop(&self) -> WsMessage {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // 확인 전에 등록해 두어야 push 알림을 놓치지 않는다
            notified.as_mut().enable();

            if let Some(msg) = self.try_pop() {
                return msg;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
