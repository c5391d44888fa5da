use anyhow::{bail, Context, Result};
use chrono::{Local, TimeZone};
use clap::Parser;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::BufRead;
use std::path::Path;
use steel_qc::backend::{engine_context, BackendConfig, HttpBackend, LoadProgress};
use steel_qc::capture::CameraConfig;
use steel_qc::cli::{Cli, Commands};
use steel_qc::config::{self, Settings};
use steel_qc::history::RecordStore;
use steel_qc::pipeline::Inspector;
use steel_qc::scheduler::{AcquisitionScheduler, Command, SchedulerHandle, TriggerMode};
use steel_qc::storage::JsonStore;
use steel_qc_common::{filter_by_severity, summarize, HistorySummary, InspectionRecord};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let data_dir = config::resolve_data_dir(cli.data_dir.as_deref())?;
    let store = JsonStore::new(&data_dir);
    let mut settings = Settings::load(&store);

    match cli.command {
        Commands::Inspect { count } => {
            println!("🔍 steel-qc - 表面検査\n");

            let mut inspector = Inspector::from_settings(&settings, &data_dir)?;
            println!("[1/2] カメラを準備中...");
            inspector.activate().await;
            print_source(&inspector);
            if !inspector.source().state().is_capturable() {
                bail!("カメラを利用できません（疑似映像も無効）");
            }

            println!("\n[2/2] 撮影・判定中（{}）...", inspector.backend_name());
            for i in 1..=count {
                let record = inspector.inspect().await?;
                println!("({}/{})", i, count);
                print_record(&record);
            }
            inspector.release();

            println!("\n✅ 検査完了（履歴 {} 件）", inspector.history().len());
        }

        Commands::Watch { interval, manual } => {
            let period_secs = interval.unwrap_or(settings.interval_seconds);
            let mode = if manual {
                TriggerMode::Manual
            } else {
                TriggerMode::continuous_secs(period_secs)
            };
            println!("👁 steel-qc - 監視（{}）\n", mode);

            let mut inspector = Inspector::from_settings(&settings, &data_dir)?;
            inspector.activate().await;
            print_source(&inspector);
            println!("\nコマンド: c=撮影, m=モード切替, r=カメラ再取得, l=推論エンジン再読み込み, q=終了\n");

            let (scheduler, handle) = AcquisitionScheduler::new(mode);

            let mut records = inspector.subscribe();
            let printer = tokio::spawn(async move {
                loop {
                    match records.recv().await {
                        Ok(record) => print_record(&record),
                        Err(RecvError::Lagged(n)) => log::warn!("表示が追いつかず {} 件を省略", n),
                        Err(RecvError::Closed) => break,
                    }
                }
            });

            spawn_stdin_reader(handle.clone(), mode, period_secs);

            let ctrl_c = handle.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    println!("\n停止中（判定中のサイクルを待っています）...");
                    ctrl_c.shutdown().await;
                }
            });
            drop(handle);

            let report = scheduler.run(&mut inspector).await;
            inspector.release();
            drop(inspector);
            let _ = printer.await;

            println!(
                "\n✅ 監視終了: {} サイクル完了, {} 件のトリガーを無視",
                report.cycles, report.rejected
            );
        }

        Commands::Pull { model } => {
            let BackendConfig::LocalHttp {
                endpoint,
                pull_endpoint,
                model_name,
            } = &settings.backend
            else {
                bail!("pull はローカル推論サーバー（local-http）でのみ使えます");
            };
            let name = model.unwrap_or_else(|| model_name.clone());
            println!("📥 steel-qc - モデル取得: {}\n", name);

            let backend = HttpBackend::new(endpoint.clone(), pull_endpoint.clone(), name.clone(), settings.timeout())?;
            let mut events = backend.pull(Some(&name)).await?;

            let bar = percent_bar()?;
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) => {
                        if let Some(percent) = event.percent() {
                            bar.set_position(percent as u64);
                        }
                        if event.is_success() {
                            bar.finish_with_message("完了");
                        } else {
                            bar.set_message(event.status);
                        }
                    }
                    Err(e) => {
                        bar.abandon_with_message("失敗");
                        return Err(e.into());
                    }
                }
            }

            println!("\n✅ モデルを取得しました: {}", name);
        }

        Commands::Reload { model_id } => {
            let BackendConfig::LocalInprocess { model_id: current } = &settings.backend else {
                bail!("reload はプロセス内推論（local-inprocess）でのみ使えます");
            };
            let target = model_id.clone().unwrap_or_else(|| current.clone());
            println!("🔄 steel-qc - モデル検証: {}\n", target);

            let context = engine_context(current, &settings.backend_options(&data_dir));
            let bar = percent_bar()?;
            let report = |p: LoadProgress| {
                bar.set_position((p.progress * 100.0) as u64);
                bar.set_message(p.text);
            };
            if let Err(e) = context.reload(model_id.as_deref(), &report).await {
                bar.abandon_with_message("失敗");
                return Err(e.into());
            }
            bar.finish_with_message("読み込み完了");

            if let Some(id) = model_id {
                settings.backend.set_model(id.clone());
                settings.save(&store)?;
                println!("✔ モデルIDを保存しました: {}", id);
            }
        }

        Commands::History {
            clear,
            summary,
            severity,
            limit,
            json,
        } => {
            let mut history = RecordStore::open(store.clone(), settings.history_cap);

            if clear {
                history.clear();
                println!("✔ 履歴を削除しました");
                return Ok(());
            }

            if summary {
                let summary = summarize(history.records(), &settings.catalog);
                if json {
                    println!("{}", serde_json::to_string_pretty(&summary)?);
                } else {
                    print_summary(&summary);
                }
                return Ok(());
            }

            let records: Vec<&InspectionRecord> = match severity {
                Some(severity) => filter_by_severity(history.records(), severity),
                None => history.records().iter().collect(),
            };
            let shown: Vec<&InspectionRecord> = records.into_iter().take(limit).collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&shown)?);
            } else if shown.is_empty() {
                println!("履歴がありません");
            } else {
                println!("検査履歴（新しい順 {} / {} 件）:", shown.len(), history.len());
                for record in shown {
                    print_record(record);
                }
            }
        }

        Commands::Config {
            show,
            set_api_key,
            backend,
            model,
            endpoint,
            pull_endpoint,
            camera_url,
            camera_file,
            no_camera,
            interval,
            history_cap,
            import,
        } => {
            if let Some(path) = import {
                settings = Settings::import(&path).with_context(|| format!("{} を取り込めません", path.display()))?;
                settings.save(&store)?;
                println!("✔ 設定を取り込みました: {}", path.display());
            }

            let mut changed = false;

            if let Some(kind) = backend {
                if settings.backend.kind() != kind.config_kind() {
                    settings.backend = BackendConfig::from_kind(kind.config_kind())
                        .with_context(|| format!("未対応のバックエンド: {}", kind))?;
                }
                changed = true;
            }
            if let Some(model) = model {
                settings.backend.set_model(model);
                changed = true;
            }
            if endpoint.is_some() || pull_endpoint.is_some() {
                let BackendConfig::LocalHttp {
                    endpoint: current_endpoint,
                    pull_endpoint: current_pull,
                    ..
                } = &mut settings.backend
                else {
                    bail!("--endpoint / --pull-endpoint は local-http バックエンドでのみ指定できます");
                };
                if let Some(url) = endpoint {
                    *current_endpoint = url;
                }
                if let Some(url) = pull_endpoint {
                    *current_pull = url;
                }
                changed = true;
            }
            if let Some(url) = camera_url {
                settings.camera = CameraConfig::HttpSnapshot { url };
                changed = true;
            }
            if let Some(path) = camera_file {
                settings.camera = CameraConfig::File { path };
                changed = true;
            }
            if no_camera {
                settings.camera = CameraConfig::None;
                changed = true;
            }
            if let Some(secs) = interval {
                settings.interval_seconds = secs;
                changed = true;
            }
            if let Some(cap) = history_cap {
                settings.history_cap = cap;
                changed = true;
            }

            if let Some(key) = set_api_key {
                settings.set_api_key(key, &store)?;
                println!("✔ APIキーを設定しました");
            } else if changed {
                settings.save(&store)?;
                println!("✔ 設定を保存しました");
            }

            if show || !changed {
                print_settings(&settings, &data_dir);
            }
        }
    }

    Ok(())
}

fn init_logger(verbose: bool) {
    let default_filter = if verbose { "info,steel_qc=debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();
}

fn percent_bar() -> Result<ProgressBar> {
    let bar = ProgressBar::new(100);
    bar.set_style(ProgressStyle::with_template("{spinner} [{bar:40.cyan/blue}] {pos:>3}% {msg}")?.progress_chars("=>-"));
    Ok(bar)
}

/// 標準入力のコマンドをスケジューラに送る
///
/// 読み取りはブロッキングなので専用スレッドで行う
fn spawn_stdin_reader(handle: SchedulerHandle, initial: TriggerMode, period_secs: u64) {
    std::thread::spawn(move || {
        let mut mode = initial;
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let sent = match line.trim() {
                "c" => handle.blocking_send(Command::Capture),
                "m" => {
                    mode = match mode {
                        TriggerMode::Manual => TriggerMode::continuous_secs(period_secs),
                        TriggerMode::Continuous { .. } => TriggerMode::Manual,
                    };
                    println!("モード: {}", mode);
                    handle.blocking_send(Command::SetMode(mode))
                }
                "r" => handle.blocking_send(Command::Retry),
                "l" => handle.blocking_send(Command::Reload),
                "q" => {
                    handle.blocking_send(Command::Shutdown);
                    break;
                }
                "" => true,
                other => {
                    println!("不明なコマンド: {}（c/m/r/l/q）", other);
                    true
                }
            };
            if !sent {
                break;
            }
        }
    });
}

fn print_source(inspector: &Inspector) {
    let source = inspector.source();
    match source.active_profile() {
        Some(profile) => println!("✔ カメラ: {} ({}) - {}", source.device_name(), profile, source.state()),
        None => println!("✔ カメラ: {} - {}", source.device_name(), source.state()),
    }
    if let Some(error) = source.last_error() {
        println!("  直近のエラー: {}", error);
    }
}

fn print_record(record: &InspectionRecord) {
    let time = Local
        .timestamp_millis_opt(record.timestamp)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();

    println!(
        "  {} {} [{}] {}（信頼度 {:.0}%）",
        time, record.id, record.batch_id, record.grade, record.confidence
    );
    for defect in &record.defects {
        println!("    - {} ({}): {}", defect.defect_type, defect.severity, defect.description);
    }
    println!("    画像: {}", record.image_ref);
}

fn print_summary(summary: &HistorySummary) {
    println!("集計（{} 件）:", summary.total);
    println!("  合格率: {:.1}%", summary.pass_rate);
    println!("  グレード分布:");
    for (grade, count) in &summary.grade_counts {
        println!("    {}: {}", grade, count);
    }
    println!("  欠陥パレート:");
    if summary.defect_pareto.is_empty() {
        println!("    （なし）");
    }
    for (defect, count) in &summary.defect_pareto {
        println!("    {}: {}", defect, count);
    }
}

fn print_settings(settings: &Settings, data_dir: &Path) {
    println!("設定:");
    println!("  データディレクトリ: {}", data_dir.display());
    println!("  バックエンド: {} (モデル: {})", settings.backend.kind(), settings.backend.model());
    if let BackendConfig::LocalHttp {
        endpoint,
        pull_endpoint,
        ..
    } = &settings.backend
    {
        println!("    エンドポイント: {}", endpoint);
        println!("    取得エンドポイント: {}", pull_endpoint);
    }
    println!("  カメラ: {}", settings.camera.describe());
    println!("  疑似映像: {}", if settings.allow_simulated { "有効" } else { "無効" });
    println!("  撮影周期: {}秒", settings.interval_seconds);
    println!("  履歴上限: {}件", settings.history_cap);
    println!("  画像保存: {}", if settings.keep_frames { "有効" } else { "無効" });
    println!("  タイムアウト: {}秒", settings.timeout_seconds);
    println!(
        "  APIキー: {}",
        if settings.get_api_key().is_some() { "設定済み" } else { "未設定" }
    );
    println!("  グレード: {}", settings.catalog.grade_names().join(" / "));
    let defects: Vec<&str> = settings.catalog.defect_types().iter().map(|d| d.name.as_str()).collect();
    println!("  欠陥種別: {}", defects.join(", "));
}
