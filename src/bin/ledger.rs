#![forbid(unsafe_code)]
//! Administrative CLI over a local ledger store.

use clap::{Parser, Subcommand};
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Color as TableColor;
use comfy_table::{Attribute, Cell, ContentArrangement, Table};
use ledgerchain::blockchain::{Block, BlockNumber, Node};
use ledgerchain::config::DEFAULT_CONFIG_FILE;
use ledgerchain::crypto::KeyPair;
use ledgerchain::genesis::{import_account_root_file, GenesisOptions};
use ledgerchain::node::{init_tracing, LedgerNode};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initializes an empty ledger from a legacy account root file
    ImportRootFile {
        path: PathBuf,
        /// Account number of the initial primary validator
        #[arg(long)]
        primary_validator: Option<String>,
        /// Fee the initial primary validator charges per transfer
        #[arg(long, default_value_t = 0)]
        fee: u64,
        /// Network address advertised by the initial primary validator
        #[arg(long)]
        network_address: Option<String>,
        /// Last block the initial primary validator may sign
        #[arg(long)]
        schedule_end: Option<BlockNumber>,
    },
    /// Shows an account's balance and lock
    Balance {
        account: String,
        /// Block number to query at (defaults to the tip)
        #[arg(long)]
        at: Option<BlockNumber>,
    },
    /// Lists blocks, newest first unless --from is given
    Blocks {
        #[arg(long)]
        from: Option<BlockNumber>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Only blocks touching this account
        #[arg(long)]
        account: Option<String>,
    },
    /// Lists block chunks and blockchain states
    Chunks,
    /// Writes a blockchain state at the current tip
    Snapshot,
    /// Pulls missing blocks from the configured peers
    Sync,
    /// Generates a new key pair
    Keygen,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    let open = || LedgerNode::from_config_file(&cli.config);

    match cli.command {
        Commands::Keygen => {
            let key = KeyPair::generate()?;
            println!("{} {}", "Account number:".bright_cyan(), key.account_number());
            println!("{} {}", "Secret key:    ".bright_cyan(), key.secret_key_hex());
        }
        Commands::ImportRootFile {
            path,
            primary_validator,
            fee,
            network_address,
            schedule_end,
        } => {
            let node = open()?;
            let mut options = GenesisOptions::default();
            if let Some(identifier) = primary_validator {
                let mut pv = Node::new(identifier, fee);
                if let Some(address) = network_address {
                    pv = pv.with_network_address(address);
                }
                options = GenesisOptions::with_primary_validator(
                    pv,
                    schedule_end.unwrap_or(BlockNumber::MAX),
                );
            }
            let state = import_account_root_file(&node.blockchain, &path, &options)?;
            println!(
                "{} {} accounts imported from {}",
                "✅".green(),
                state.account_states.len(),
                path.display()
            );
        }
        Commands::Balance { account, at } => {
            let blockchain = open()?.blockchain;
            let at = match at {
                Some(n) => Some(n),
                None => blockchain.last_block_number()?,
            };
            let balance = blockchain.get_balance(&account, at)?;
            let lock = blockchain.get_balance_lock(&account, at)?;
            println!("{} {}", "Account:".bright_cyan(), account);
            println!("{} {:?}", "At block:".bright_cyan(), at);
            println!("{} {}", "Balance:".bright_green().bold(), balance);
            println!("{} {}", "Lock:".bright_cyan(), lock);
        }
        Commands::Blocks {
            from,
            limit,
            account,
        } => {
            let blockchain = open()?.blockchain;
            let blocks: Vec<Block> = match (from, account) {
                (Some(from), _) => blockchain
                    .yield_blocks_from(from)?
                    .take(limit)
                    .collect::<Result<Vec<_>, _>>()?,
                (None, Some(account)) => blockchain
                    .yield_blocks_for_account(&account)?
                    .take(limit)
                    .collect::<Result<Vec<_>, _>>()?,
                (None, None) => blockchain
                    .yield_blocks_reversed()?
                    .take(limit)
                    .collect::<Result<Vec<_>, _>>()?,
            };
            print_blocks(&blocks);
        }
        Commands::Chunks => {
            let blockchain = open()?.blockchain;
            let mut table = header_table(&["Chunk", "Blocks", "Finalized", "Compressed"]);
            for chunk in blockchain.yield_block_chunks_meta()? {
                table.add_row(vec![
                    Cell::new(&chunk.filename),
                    Cell::new(format!("{}..={}", chunk.start, chunk.end)),
                    Cell::new(chunk.finalized),
                    Cell::new(chunk.compressed),
                ]);
            }
            println!("{}", table);

            let mut table = header_table(&["Blockchain state", "Last block"]);
            for state in blockchain.yield_blockchain_states_meta()? {
                table.add_row(vec![
                    Cell::new(&state.filename),
                    Cell::new(format!("{:?}", state.last_block_number)),
                ]);
            }
            println!("{}", table);
        }
        Commands::Snapshot => match open()?.blockchain.snapshot_blockchain_state()? {
            Some(state) => println!(
                "{} Blockchain state at block {:?}",
                "✅".green(),
                state.last_block_number
            ),
            None => println!("{}", "No blocks to snapshot".yellow()),
        },
        Commands::Sync => {
            let node = open()?;
            let applied = node.sync_once().await?;
            println!(
                "{} {} blocks applied, tip {:?}",
                "🔄".bright_cyan(),
                applied,
                node.blockchain.last_block_number()?
            );
        }
    }

    Ok(())
}

fn header_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| {
                    Cell::new(h)
                        .fg(TableColor::Cyan)
                        .add_attribute(Attribute::Bold)
                })
                .collect::<Vec<_>>(),
        );
    table
}

fn shorten(value: &str) -> String {
    if value.len() > 20 {
        format!("{}...{}", &value[..8], &value[value.len() - 8..])
    } else {
        value.to_string()
    }
}

fn print_blocks(blocks: &[Block]) {
    if blocks.is_empty() {
        println!("{}", "📭 No blocks found".yellow());
        return;
    }
    let mut table = header_table(&["Block", "Type", "Signer", "Accounts", "Date"]);
    for block in blocks {
        table.add_row(vec![
            Cell::new(format!("#{}", block.number())).fg(TableColor::White),
            Cell::new(block.message.request.message.kind()).fg(TableColor::Green),
            Cell::new(shorten(&block.message.request.signer)),
            Cell::new(block.message.updated_account_states.len()),
            Cell::new(block.message.timestamp.format("%m/%d %H:%M").to_string())
                .fg(TableColor::Grey),
        ]);
    }
    println!("{}", table);
}
