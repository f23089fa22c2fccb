//! Benchmark utilities.

use rand::Rng;
use strictkv_core::{Database, Result};

/// Generate random data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate `count` keys under `prefix`, in key order.
pub fn generate_keys(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{prefix}{i:08}")).collect()
}

/// Opens an in-memory database holding `count` rows of `value_size` bytes.
pub fn populated_db(prefix: &str, count: usize, value_size: usize) -> Database {
    let db = Database::open_in_memory().expect("Failed to open in-memory database");
    let rows: Vec<_> = generate_keys(prefix, count)
        .into_iter()
        .map(|key| (key, random_data(value_size)))
        .collect();
    db.transact(|tr| -> Result<()> {
        for (key, value) in &rows {
            tr.set(key, value);
        }
        Ok(())
    })
    .expect("Failed to populate database");
    db
}
