//! # Upload Optimizer Library
//!
//! Questo è il modulo principale della libreria che espone tutte le API pubbliche.
//!
//! ## Responsabilità:
//! - Definisce la struttura modulare dell'applicazione
//! - Espone i tipi e le funzioni principali tramite re-exports
//! - Fornisce un'interfaccia pulita per il main.rs e per altri consumatori
//!
//! ## Architettura dei moduli:
//! - `config`: Gestione configurazione e validazione parametri
//! - `error`: Tipi di errore custom per ogni fase
//! - `sanitize`: Normalizzazione dei nomi file prima dell'upload
//! - `format`: Formati di output e range di qualità
//! - `blob`: Registry degli object URL dei file originali
//! - `queue`: Coda dei file e stato di ogni record
//! - `transfer`: Backend di trasformazione (HTTP, locale, in memoria)
//! - `optimizer`: Pipeline per record e workspace di sessione
//! - `crop`: Sessione di crop e rasterizzazione
//! - `export`: Archivio zip degli output
//! - `file_manager`: Discovery e caricamento delle immagini
//! - `progress` / `json_output`: Rendering dello stato della coda
//!
//! ## Utilizzo:
//! ```rust,ignore
//! use upload_optimizer::{Config, LocalBackend, NoopObserver, Workspace};
//!
//! let api = Arc::new(LocalBackend::temporary(2560)?);
//! let mut workspace = Workspace::new(Config::default(), api, Arc::new(NoopObserver));
//! workspace.add_files(files);
//! let stats = workspace.optimize_all().await;
//! ```

pub mod blob;
pub mod config;
pub mod crop;
pub mod error;
pub mod export;
pub mod file_manager;
pub mod format;
pub mod json_output;
pub mod optimizer;
pub mod progress;
pub mod queue;
pub mod sanitize;
pub mod transfer;

pub use config::Config;
pub use crop::{CropRect, CropShape, CropSpec};
pub use error::OptimizeError;
pub use export::ArchiveExporter;
pub use format::OutputFormat;
pub use optimizer::{Comparison, Pipeline, Workspace};
pub use queue::{FileRecord, NoopObserver, QueueObserver, RecordId, RecordStatus, SourceFile};
pub use sanitize::sanitize_filename;
pub use transfer::{HttpApi, LocalBackend, MemoryApi, TransformApi};
