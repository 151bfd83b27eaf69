pub mod config;
pub mod document;
pub mod system_db;
pub mod store;
pub mod model;
pub mod sequence;
pub mod token;
pub mod sync;
pub mod cascade;
pub mod service;
pub mod seed;
pub mod error;

pub use config::StoreConfig;
pub use document::Document;
pub use error::{RegistrarError, Result};
pub use model::{Course, Department, Enrollment, Entity, Grade, Instructor, Student};
pub use sequence::{Sequence, SequenceAllocator};
pub use service::Registrar;
pub use store::Store;
pub use token::{ConcurrencyToken, TokenCheck};
