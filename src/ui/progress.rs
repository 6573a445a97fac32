//! 终端进度渲染引擎 (Terminal UI Progress Engine)
//!
//! 基于 `indicatif` 将下载事件渲染为多行进度条：每个章节一行，合集模式额外一行打包进度。

use std::sync::OnceLock;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::task::JoinHandle;

use crate::core::event::{DownloadEvent, EventReceiver};
use crate::core::model::ChapterState;
use crate::engine::context::FETCH_TICKS;

/// 标题列宽
const TITLE_WIDTH: usize = 30;

/// 全局 TUI 容器 (Singleton)
static MULTI: OnceLock<MultiProgress> = OnceLock::new();

/// 获取全局进度容器实例
pub fn get_multi() -> &'static MultiProgress {
    MULTI.get_or_init(MultiProgress::new)
}

fn chapter_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix:30} [{bar:40.cyan/blue}] {percent:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
}

fn bundle_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {prefix:28} [{bar:40.green/white}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
}

struct ChapterBar {
    bar: ProgressBar,
    state: ChapterState,
}

/// TUI 状态容器
#[derive(Default)]
struct UiState {
    chapters: Vec<ChapterBar>,
    bundle: Option<ProgressBar>,
}

impl UiState {
    fn chapter(&mut self, slot: usize) -> Option<&mut ChapterBar> {
        self.chapters.get_mut(slot)
    }

    fn handle(&mut self, event: DownloadEvent) {
        let multi = get_multi();

        match event {
            DownloadEvent::JobStarted { chapters, .. } => {
                self.chapters = chapters
                    .iter()
                    .map(|title| {
                        let bar = multi.add(ProgressBar::new(FETCH_TICKS));
                        bar.set_style(chapter_style());
                        bar.set_prefix(truncate_string(title, TITLE_WIDTH));
                        ChapterBar {
                            bar,
                            state: ChapterState::Pending,
                        }
                    })
                    .collect();
            }
            DownloadEvent::ChapterState { slot, state, detail } => {
                let Some(entry) = self.chapter(slot) else {
                    return;
                };
                entry.state = state;
                match state {
                    ChapterState::Pending => {}
                    ChapterState::Fetching => entry.bar.set_message("[Fetching]"),
                    ChapterState::Downloading => {
                        entry.bar.set_position(FETCH_TICKS);
                        entry.bar.set_message("[Downloading]");
                    }
                    ChapterState::Archiving => entry.bar.set_message("[Archiving]"),
                    ChapterState::Staged => entry.bar.set_message("[Staged]"),
                    ChapterState::Done => match detail {
                        Some(detail) => entry.bar.abandon_with_message(format!("[{}]", detail)),
                        None => {
                            if let Some(len) = entry.bar.length() {
                                entry.bar.set_position(len);
                            }
                            entry.bar.finish_with_message("[Done]");
                        }
                    },
                    ChapterState::Failed => {
                        let reason = detail.unwrap_or_default();
                        entry
                            .bar
                            .abandon_with_message(format!("[Download Failed] {}", truncate_string(&reason, 60)));
                    }
                }
            }
            DownloadEvent::ChapterTotal { slot, total } => {
                if let Some(entry) = self.chapter(slot) {
                    entry.bar.set_length(total);
                }
            }
            DownloadEvent::ChapterTick { slot, delta } => {
                if let Some(entry) = self.chapter(slot) {
                    // 获取阶段的心跳不越过其固定配额
                    if entry.state == ChapterState::Fetching && entry.bar.position() + delta >= FETCH_TICKS {
                        return;
                    }
                    entry.bar.inc(delta);
                }
            }
            DownloadEvent::PageFailed { slot, page, error } => {
                if let Some(entry) = self.chapter(slot) {
                    entry.bar.set_message(format!(
                        "[Downloading: Error page {}: {}]",
                        page,
                        truncate_string(&error, 40)
                    ));
                }
            }
            DownloadEvent::ChapterArchived { .. } => {}
            DownloadEvent::BundleStarted { total_files } => {
                let bar = multi.add(ProgressBar::new(total_files));
                bar.set_style(bundle_style());
                bar.set_prefix("Bundle");
                bar.set_message("[Archiving]");
                bar.enable_steady_tick(Duration::from_millis(100));
                self.bundle = Some(bar);
            }
            DownloadEvent::BundleTick => {
                if let Some(bar) = &self.bundle {
                    bar.inc(1);
                }
            }
            DownloadEvent::BundleSaved { path } => {
                if let Some(bar) = &self.bundle {
                    bar.finish_with_message(format!("[Saved] {}", path));
                }
            }
            DownloadEvent::BundleFailed { error } => {
                if let Some(bar) = &self.bundle {
                    bar.abandon_with_message(format!("[Bundle Failed] {}", error));
                }
            }
            DownloadEvent::JobFinished { .. } => {
                for entry in &self.chapters {
                    if !entry.state.is_terminal() {
                        entry.bar.abandon();
                    }
                }
            }
        }
    }
}

/// 进度协调器 (Progress Orchestrator)
pub struct Ui;

impl Ui {
    /// 激活事件监听循环；所有发送端释放后任务结束
    pub fn run(receiver: EventReceiver) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut state = UiState::default();
            while let Some(event) = receiver.recv_async().await {
                state.handle(event);
            }
        })
    }
}

/// 按字符截断，超长时以省略号结尾
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(n: usize) -> UiState {
        let mut ui = UiState::default();
        ui.handle(DownloadEvent::JobStarted {
            series: "Series".into(),
            chapters: (1..=n).map(|i| format!("Chapter {}", i)).collect(),
        });
        ui
    }

    #[test]
    fn truncates_by_characters() {
        assert_eq!(truncate_string("short", 10), "short");
        assert_eq!(truncate_string("Capítulo 0001 largo", 10), "Capítul...");
    }

    #[test]
    fn fetch_ticks_stay_within_quota() {
        let mut ui = started(1);
        ui.handle(DownloadEvent::ChapterState {
            slot: 0,
            state: ChapterState::Fetching,
            detail: None,
        });
        for _ in 0..200 {
            ui.handle(DownloadEvent::ChapterTick { slot: 0, delta: 1 });
        }
        assert_eq!(ui.chapters[0].bar.position(), FETCH_TICKS - 1);

        ui.handle(DownloadEvent::ChapterTotal { slot: 0, total: FETCH_TICKS + 4 });
        ui.handle(DownloadEvent::ChapterState {
            slot: 0,
            state: ChapterState::Downloading,
            detail: None,
        });
        ui.handle(DownloadEvent::ChapterTick { slot: 0, delta: 1 });
        assert_eq!(ui.chapters[0].bar.position(), FETCH_TICKS + 1);
        assert_eq!(ui.chapters[0].bar.length(), Some(FETCH_TICKS + 4));
    }

    #[test]
    fn events_for_unknown_slots_are_ignored() {
        let mut ui = started(1);
        ui.handle(DownloadEvent::ChapterTick { slot: 7, delta: 1 });
        ui.handle(DownloadEvent::ChapterState {
            slot: 7,
            state: ChapterState::Failed,
            detail: None,
        });
        assert_eq!(ui.chapters.len(), 1);
    }
}
