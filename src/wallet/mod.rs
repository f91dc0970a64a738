mod store;
mod wallet;

pub use store::{WalletStore, WALLET_FILE};
pub use wallet::{
    address_from_public_key, hash_public_key, validate_address, Wallet, ADDRESS_CHECK_SUM_LEN,
};
