//! 検査履歴（RecordStore）
//!
//! 新しい順・件数上限付きの履歴を保持し、変更のたびに一覧全体を保存する。
//! 保存に失敗してもメモリ上の履歴を正とし、処理は継続する。

use crate::storage::{JsonStore, RECORDS_KEY};
use steel_qc_common::InspectionRecord;

/// 既定の履歴上限
pub const DEFAULT_HISTORY_CAP: usize = 100;

pub struct RecordStore {
    store: JsonStore,
    cap: usize,
    records: Vec<InspectionRecord>,
}

impl RecordStore {
    /// 保存済みの履歴を読み込んで開く
    ///
    /// 無い・壊れている場合は空の履歴になる
    pub fn open(store: JsonStore, cap: usize) -> Self {
        let cap = cap.max(1);
        let mut records: Vec<InspectionRecord> = store.load(RECORDS_KEY).unwrap_or_default();
        records.truncate(cap);

        Self { store, cap, records }
    }

    /// 保存済みの履歴を返す（新しい順）
    pub fn load(&self) -> Vec<InspectionRecord> {
        let mut records: Vec<InspectionRecord> = self.store.load(RECORDS_KEY).unwrap_or_default();
        records.truncate(self.cap);
        records
    }

    /// メモリ上の履歴（新しい順）
    pub fn records(&self) -> &[InspectionRecord] {
        &self.records
    }

    pub fn latest(&self) -> Option<&InspectionRecord> {
        self.records.first()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// 先頭に追加し、上限を超えた古いレコードを落として保存する
    ///
    /// # Returns
    /// 上限超過で削除されたレコード（古い順ではなく格納順）
    pub fn append(&mut self, record: InspectionRecord) -> Vec<InspectionRecord> {
        self.records.insert(0, record);
        let evicted = if self.records.len() > self.cap {
            self.records.split_off(self.cap)
        } else {
            Vec::new()
        };

        self.persist();
        evicted
    }

    /// メモリと保存先の両方を空にする
    pub fn clear(&mut self) {
        self.records.clear();
        if let Err(e) = self.store.remove(RECORDS_KEY) {
            log::warn!("履歴ファイルを削除できません: {}", e);
        }
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(RECORDS_KEY, &self.records) {
            log::warn!("履歴を保存できません（メモリ上で継続）: {}", e);
        }
    }
}
