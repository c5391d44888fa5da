//! 撮影スケジューラ（AcquisitionScheduler）
//!
//! 手動トリガーまたは一定周期で判定サイクルを起動する。
//! サイクルは常に1本だけで、実行中のトリガーは受け付けない（キューにも積まない）。
//! 周期タイマーはサイクル完了時にリセットされ、次の撮影は完了から1周期後になる。

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// コマンドチャネルの容量
const COMMAND_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// 操作ごとに1回撮影
    Manual,
    /// 一定周期で撮影
    Continuous { period: Duration },
}

impl TriggerMode {
    pub fn continuous_secs(secs: u64) -> Self {
        TriggerMode::Continuous {
            period: Duration::from_secs(secs.max(1)),
        }
    }
}

impl std::fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerMode::Manual => write!(f, "手動"),
            TriggerMode::Continuous { period } => write!(f, "連続（{}秒周期）", period.as_secs_f64()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// 手動撮影
    Capture,
    SetMode(TriggerMode),
    Enable,
    Disable,
    /// カメラの再取得
    Retry,
    /// 推論エンジンの読み込み直し
    Reload,
    /// 実行中のサイクルを待ってから停止
    Shutdown,
}

/// スケジューラが駆動する判定サイクル
#[async_trait]
pub trait CycleRunner: Send {
    /// 静止画を取り出せる状態か
    fn is_capturable(&self) -> bool;

    /// 撮影から履歴追加までの1サイクル
    async fn run_cycle(&mut self);

    /// 映像ソースを取得し直す
    async fn reactivate(&mut self);

    /// 推論エンジンを読み込み直す（エンジンを持たなければ何もしない）
    async fn reload_engine(&mut self) {}
}

/// 実行結果の集計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerReport {
    /// 完了したサイクル数
    pub cycles: usize,
    /// 実行中・撮影不可のため受け付けなかったトリガー数
    pub rejected: usize,
}

/// スケジューラへのコマンド送信口
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
}

impl SchedulerHandle {
    /// 送信できた場合 true（スケジューラ停止後は false）
    pub async fn send(&self, command: Command) -> bool {
        self.tx.send(command).await.is_ok()
    }

    /// 非同期コンテキスト外（標準入力スレッドなど）からの送信
    pub fn blocking_send(&self, command: Command) -> bool {
        self.tx.blocking_send(command).is_ok()
    }

    pub async fn capture(&self) -> bool {
        self.send(Command::Capture).await
    }

    pub async fn set_mode(&self, mode: TriggerMode) -> bool {
        self.send(Command::SetMode(mode)).await
    }

    pub async fn reload(&self) -> bool {
        self.send(Command::Reload).await
    }

    pub async fn shutdown(&self) -> bool {
        self.send(Command::Shutdown).await
    }
}

pub struct AcquisitionScheduler {
    mode: TriggerMode,
    enabled: bool,
    rx: mpsc::Receiver<Command>,
    timer: Option<Interval>,
    shutdown_requested: bool,
    report: SchedulerReport,
}

impl AcquisitionScheduler {
    pub fn new(mode: TriggerMode) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let scheduler = Self {
            mode,
            enabled: true,
            rx,
            timer: None,
            shutdown_requested: false,
            report: SchedulerReport::default(),
        };
        (scheduler, SchedulerHandle { tx })
    }

    pub fn mode(&self) -> TriggerMode {
        self.mode
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 停止コマンドまで（またはハンドルが全て破棄されるまで）サイクルを駆動する
    pub async fn run<R: CycleRunner>(mut self, runner: &mut R) -> SchedulerReport {
        self.arm_timer();
        log::info!("スケジューラ開始: {}", self.mode);

        while !self.shutdown_requested {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(Command::Capture) => {
                        if runner.is_capturable() && self.enabled {
                            self.run_cycle(runner).await;
                        } else {
                            log::warn!("撮影できない状態のため手動トリガーを無視しました");
                            self.report.rejected += 1;
                        }
                    }
                    Some(Command::Retry) => {
                        runner.reactivate().await;
                        self.reset_timer();
                    }
                    Some(Command::Reload) => {
                        runner.reload_engine().await;
                        self.reset_timer();
                    }
                    Some(command) => self.apply(command),
                    None => self.shutdown_requested = true,
                },
                _ = next_tick(&mut self.timer) => {
                    if runner.is_capturable() {
                        self.run_cycle(runner).await;
                    } else {
                        log::debug!("映像ソースが撮影不可のため周期撮影をスキップ");
                    }
                }
            }
        }

        self.timer = None;
        log::info!(
            "スケジューラ停止: {} サイクル完了, {} 件のトリガーを無視",
            self.report.cycles,
            self.report.rejected
        );
        self.report
    }

    /// サイクルを実行し、その間に届いたコマンドも処理する
    async fn run_cycle<R: CycleRunner>(&mut self, runner: &mut R) {
        let cycle = runner.run_cycle();
        tokio::pin!(cycle);

        loop {
            tokio::select! {
                _ = &mut cycle => break,
                command = self.rx.recv() => match command {
                    Some(Command::Capture) | Some(Command::Retry) | Some(Command::Reload) => {
                        log::warn!("判定中のためトリガーを無視しました");
                        self.report.rejected += 1;
                    }
                    Some(command) => self.apply(command),
                    // 送信側が無くなっても実行中のサイクルは最後まで待つ
                    None => {
                        self.shutdown_requested = true;
                        cycle.as_mut().await;
                        break;
                    }
                },
            }
        }

        self.report.cycles += 1;
        self.reset_timer();
    }

    /// モード・有効状態・停止要求を反映
    fn apply(&mut self, command: Command) {
        match command {
            Command::SetMode(mode) => {
                if mode != self.mode {
                    log::info!("撮影モード変更: {} → {}", self.mode, mode);
                }
                self.mode = mode;
                self.arm_timer();
            }
            Command::Enable => {
                if !self.enabled {
                    log::info!("スケジューラを再開");
                    self.enabled = true;
                    self.arm_timer();
                }
            }
            Command::Disable => {
                if self.enabled {
                    log::info!("スケジューラを一時停止");
                }
                self.enabled = false;
                self.timer = None;
            }
            Command::Shutdown => self.shutdown_requested = true,
            Command::Capture | Command::Retry | Command::Reload => {}
        }
    }

    /// 古いタイマーを捨て、連続モードなら1周期後から新たに刻む
    fn arm_timer(&mut self) {
        self.timer = match self.mode {
            TriggerMode::Continuous { period } if self.enabled => {
                let mut timer = interval_at(Instant::now() + period, period);
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Some(timer)
            }
            _ => None,
        };
    }

    fn reset_timer(&mut self) {
        if let Some(timer) = self.timer.as_mut() {
            timer.reset();
        }
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
