//! 事件系统定义
//!
//! 用于下载管线与终端 UI 之间的解耦通信。`slot` 为章节在本次任务中的序号。

use flume::{Receiver, Sender};

use crate::core::model::ChapterState;

/// 下载事件类型
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    /// 任务开始，携带每个章节的展示标题
    JobStarted { series: String, chapters: Vec<String> },

    /// 章节状态迁移
    ChapterState {
        slot: usize,
        state: ChapterState,
        detail: Option<String>,
    },

    /// 页数确定后重新计算的进度总量
    ChapterTotal { slot: usize, total: u64 },

    /// 章节进度前进
    ChapterTick { slot: usize, delta: u64 },

    /// 单页最终失败
    PageFailed { slot: usize, page: u32, error: String },

    /// 非合集模式下的归档产物
    ChapterArchived { slot: usize, path: String },

    /// 合集打包开始
    BundleStarted { total_files: u64 },

    BundleTick,

    BundleSaved { path: String },

    BundleFailed { error: String },

    /// 任务结束
    JobFinished { completed: usize, failed: usize },
}

/// 事件发送器
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<DownloadEvent>,
}

impl EventSender {
    pub fn new(tx: Sender<DownloadEvent>) -> Self {
        Self { tx }
    }

    /// 发送事件
    pub fn emit(&self, event: DownloadEvent) {
        let _ = self.tx.send(event);
    }

    pub fn chapter_state(&self, slot: usize, state: ChapterState) {
        self.emit(DownloadEvent::ChapterState {
            slot,
            state,
            detail: None,
        });
    }

    pub fn chapter_tick(&self, slot: usize) {
        self.emit(DownloadEvent::ChapterTick { slot, delta: 1 });
    }
}

/// 事件接收器
pub struct EventReceiver {
    rx: Receiver<DownloadEvent>,
}

impl EventReceiver {
    pub fn new(rx: Receiver<DownloadEvent>) -> Self {
        Self { rx }
    }

    /// 非阻塞接收事件
    pub fn try_recv(&self) -> Option<DownloadEvent> {
        self.rx.try_recv().ok()
    }

    /// 异步接收事件
    pub async fn recv_async(&self) -> Option<DownloadEvent> {
        self.rx.recv_async().await.ok()
    }
}

/// 创建事件通道
pub fn create_event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = flume::unbounded();
    (EventSender::new(tx), EventReceiver::new(rx))
}
