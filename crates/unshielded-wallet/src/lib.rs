#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]
#![cfg_attr(
    test,
    allow(
        clippy::default_trait_access,
        clippy::needless_pass_by_value,
        clippy::too_many_lines
    )
)]

pub mod balancer;
pub mod config;
pub mod encoding;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod pending;
pub mod snapshot;
pub mod sync;
pub mod transaction;
pub mod wallet;

pub use balancer::{BalanceRecipe, ChangeOutput, Coin, CostModel, Imbalances, QualifiedCoin};
pub use config::WalletConfig;
pub use encoding::WireEncodable;
pub use error::WalletError;
pub use lifecycle::{
    CoordinatorConfig, ProvingService, RevertOutcome, RevertibleLedger, SubmissionService,
    SubmissionStage, TransactionCoordinator,
};
pub use pending::{PendingStore, PendingTracker, PendingTransactions, TransactionTrait};
pub use sync::{RemoteUpdate, SyncApplier, SyncProgress, SyncSource, TransactionHistory, UpdateStream};
pub use transaction::{UnshieldedTransaction, UnshieldedTransactionTrait};
pub use wallet::{UnshieldedWallet, UnshieldedWalletState};
