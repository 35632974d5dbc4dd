use anyhow::{bail, Context};
use log::info;
use std::time::Duration;

use pow_ledger::blockchain::{transaction, Blockchain, MiningLimits, ProofEngine, Transaction, Wallet};
use pow_ledger::ChainConfig;

const BACKGROUND_DEADLINE: Duration = Duration::from_secs(30);

// Builds and signs a transfer, refusing to return one that does not verify
fn signed_transfer(sender: &Wallet, receiver: &Wallet, amount: f64) -> anyhow::Result<Transaction> {
    let mut tx = Transaction::new(sender.address().clone(), receiver.address().clone(), amount);
    tx.sign(sender)?;

    let signature = tx.signature.as_ref().context("signature missing after signing")?;
    if !transaction::verify(sender.public_key(), &tx, signature)? {
        bail!("signature for {} -> {} did not verify", tx.sender, tx.receiver);
    }

    Ok(tx)
}

fn print_chain(chain: &Blockchain) {
    let engine = chain.engine();

    for (i, block) in chain.blocks().iter().enumerate() {
        println!("BLOCK {}", i + 1);
        println!("PrevHash: {}", block.prev_hash());
        println!("Hash: {}", block.hash());
        println!("Data: {}", block.data());
        println!("Nonce: {}", block.nonce());
        println!("Transactions: {}", block.transactions().len());
        println!("Is valid: {}", engine.check(&block.header(), block.nonce()));
        println!();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = ChainConfig::from_env()?;
    info!("Starting ledger with difficulty {}", config.difficulty);

    let chain = Blockchain::new(config)?;

    let alice = Wallet::new()?;
    let bob = Wallet::new()?;
    info!("Alice: {}", alice.address());
    info!("Bob: {}", bob.address());

    for (i, data) in ["Block 1", "Block 2", "Block 3"].iter().enumerate() {
        let tx = signed_transfer(&alice, &bob, 10.0 * (i + 1) as f64)?;
        chain.add_block(*data, vec![tx])?;
    }

    let refund = signed_transfer(&bob, &alice, 5.0)?;
    chain
        .mine_block("Block 4", vec![refund], MiningLimits::with_deadline(BACKGROUND_DEADLINE))
        .await?;

    print_chain(&chain);

    chain.validate_chain()?;
    println!("{}", serde_json::to_string_pretty(&chain.blocks())?);

    Ok(())
}
