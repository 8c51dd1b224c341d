//! Store de registros – log JSON append-only.
//!
//! O arquivo é um único array JSON pretty-printed, reescrito inteiro a cada
//! append. Um lock por processo serializa o ciclo ler → anexar → gravar.
//! Persistência é best-effort: falhas são logadas e engolidas aqui.

use crate::types::InterpretedRecord;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Erros internos do store. Não atravessam [`RecordStore::append`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Erro de I/O em {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Log corrompido: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Log de [`InterpretedRecord`] em disco.
#[derive(Debug)]
pub struct RecordStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Anexa um registro ao fim do log.
    ///
    /// Cria o arquivo (e diretórios) se necessário. Um log existente que não
    /// parseia é tratado como vazio. Nunca retorna erro ao chamador.
    pub fn append(&self, record: &InterpretedRecord) {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Err(e) = self.try_append(record) {
            warn!("Falha ao persistir registro: {e}");
        }
    }

    /// Retorna até `limit` registros mais recentes, do mais antigo ao mais novo.
    pub fn read_recent(&self, limit: usize) -> Vec<InterpretedRecord> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut records = match self.load() {
            Ok(records) => records,
            Err(e) => {
                debug!("Log ilegível, retornando vazio: {e}");
                return Vec::new();
            }
        };

        let skip = records.len().saturating_sub(limit);
        records.drain(..skip);
        records
    }

    /// Último registro persistido, se houver.
    pub fn latest(&self) -> Option<InterpretedRecord> {
        self.read_recent(1).pop()
    }

    fn try_append(&self, record: &InterpretedRecord) -> Result<(), StoreError> {
        let mut records = match self.load() {
            Ok(records) => records,
            Err(StoreError::Corrupt(e)) => {
                warn!("Log {} corrompido ({e}), recomeçando vazio", self.path.display());
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        records.push(record.clone());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let content = serde_json::to_string_pretty(&records)?;
        std::fs::write(&self.path, content).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }

    /// Lê o log inteiro. Arquivo inexistente equivale a log vazio.
    fn load(&self) -> Result<Vec<InterpretedRecord>, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
