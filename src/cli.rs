use clap::{Parser, Subcommand};
use std::path::PathBuf;
use steel_qc_common::Severity;

#[derive(Parser)]
#[command(name = "steel-qc")]
#[command(about = "溶融亜鉛めっき鋼板の表面検査ツール（撮影・AI判定・履歴）", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 詳細ログを出力
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// データディレクトリ（STEEL_QC_HOME が優先）
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 手動モードで撮影・判定
    Inspect {
        /// 判定回数
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,
    },

    /// 連続/手動モードで監視（c: 撮影, m: モード切替, r: カメラ再取得, q: 終了）
    Watch {
        /// 撮影周期（秒、省略時は設定値）
        #[arg(short, long)]
        interval: Option<u64>,

        /// 手動モードで開始
        #[arg(long)]
        manual: bool,
    },

    /// ローカル推論サーバーにモデルを取得
    Pull {
        /// モデル名（省略時は設定値）
        #[arg(short, long)]
        model: Option<String>,
    },

    /// モデルを読み込めるか検証し、成功したらモデルIDを保存する
    ///
    /// 実行中の watch には影響しない（watch では l で再読み込み）
    Reload {
        /// 切り替えるモデルID
        #[arg(long)]
        model_id: Option<String>,
    },

    /// 検査履歴を表示/削除
    History {
        /// 履歴を削除
        #[arg(long)]
        clear: bool,

        /// 集計（グレード分布・合格率・欠陥パレート）を表示
        #[arg(long)]
        summary: bool,

        /// 指定した重大度の欠陥を含むレコードのみ (low/medium/high)
        #[arg(long)]
        severity: Option<Severity>,

        /// 表示件数
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// JSONで出力
        #[arg(long)]
        json: bool,
    },

    /// 設定を表示/編集
    Config {
        /// 設定を表示
        #[arg(long)]
        show: bool,

        /// APIキーを設定
        #[arg(long)]
        set_api_key: Option<String>,

        /// バックエンド (inprocess/http/cloud)
        #[arg(long)]
        backend: Option<BackendKind>,

        /// モデル名（in-process ではモデルID）
        #[arg(long)]
        model: Option<String>,

        /// ローカル推論サーバーのエンドポイント
        #[arg(long)]
        endpoint: Option<String>,

        /// モデル取得エンドポイント
        #[arg(long)]
        pull_endpoint: Option<String>,

        /// IPカメラのスナップショットURL
        #[arg(long, conflicts_with_all = ["camera_file", "no_camera"])]
        camera_url: Option<String>,

        /// 画像ファイルをカメラとして使う
        #[arg(long, conflicts_with = "no_camera")]
        camera_file: Option<PathBuf>,

        /// カメラを使わない（疑似映像）
        #[arg(long)]
        no_camera: bool,

        /// 連続撮影の周期（秒）
        #[arg(long)]
        interval: Option<u64>,

        /// 履歴の上限件数
        #[arg(long)]
        history_cap: Option<usize>,

        /// 設定JSONを取り込む
        #[arg(long)]
        import: Option<PathBuf>,
    },
}

/// バックエンド種別
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    InProcess,
    Http,
    Cloud,
}

impl BackendKind {
    /// 設定JSON上の種別名
    pub fn config_kind(&self) -> &'static str {
        match self {
            BackendKind::InProcess => "local-inprocess",
            BackendKind::Http => "local-http",
            BackendKind::Cloud => "cloud",
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inprocess" | "local-inprocess" | "local" => Ok(BackendKind::InProcess),
            "http" | "local-http" | "ollama" => Ok(BackendKind::Http),
            "cloud" | "gemini" => Ok(BackendKind::Cloud),
            _ => Err(format!("Unknown backend: {}. Use inprocess, http, or cloud", s)),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.config_kind())
    }
}
