//! steel-qc: 鋼板表面検査パイプライン
//!
//! カメラ（または疑似映像）から静止画を取り、AIバックエンドで等級と欠陥を判定して
//! 件数上限付きの履歴に保存する。
//!
//! - [`capture`]: 映像取得（プロファイル順の取得と疑似映像への切替）
//! - [`scheduler`]: 手動/周期トリガー（判定の重複なし）
//! - [`backend`]: プロセス内・ローカルHTTP・クラウドの推論バックエンド
//! - [`normalizer`]: 応答の検証とカタログへの照合
//! - [`history`]: 履歴（新しい順・上限付き・永続化）
//! - [`pipeline`]: 上記をつなぐ判定サイクル

pub mod backend;
pub mod capture;
pub mod cli;
pub mod config;
pub mod error;
pub mod history;
pub mod normalizer;
pub mod pipeline;
pub mod scheduler;
pub mod storage;

pub use error::{BackendError, QcError, Result};
