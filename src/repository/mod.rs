pub mod account_repository;
pub mod cursor_repository;
pub mod database;
pub mod holder_repository;
pub mod memory;
pub mod models;
pub mod store;
pub mod token_repository;
pub mod transfer_repository;

pub use account_repository::AccountRepository;
pub use cursor_repository::CursorRepository;
pub use database::Database;
pub use holder_repository::HolderRepository;
pub use memory::MemoryStore;
pub use models::{Account, PlaceholderMetadata, Token, TokenHolder, Transfer, u256_to_bigint};
pub use store::{BatchChanges, Store};
pub use token_repository::TokenRepository;
pub use transfer_repository::{TransferFilter, TransferRepository, TransferStats};
