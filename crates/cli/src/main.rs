//! cartsync CLI - Inspect and edit a storefront cart from the terminal.
//!
//! # Usage
//!
//! ```bash
//! # Show the cart for the stored anonymous session
//! cartsync cart show
//!
//! # Add two units of a product
//! cartsync cart add p1 --quantity 2
//!
//! # Change a line's quantity, then remove it
//! cartsync cart update 64f0c2 3
//! cartsync cart remove 64f0c2
//!
//! # Act as a logged-in user
//! CARTSYNC_TOKEN=eyJhbGciOi... cartsync orders summary
//!
//! # Remember the user record returned by a login
//! cartsync session set-user '{"_id": "64f0aa", "name": "Sam"}'
//! ```
//!
//! # Commands
//!
//! - `cart show|add|update|remove|clear` - Cart operations
//! - `orders list|summary|admin` - Order history
//! - `session show|set-user|forget` - Local identity state
//!
//! Set `RUST_LOG` to change log verbosity (default `info`).

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{CommandError, Context};

#[derive(Parser)]
#[command(name = "cartsync")]
#[command(author, version, about = "Cart synchronization client")]
struct Cli {
    /// Commerce API origin (defaults to `CARTSYNC_API_URL` or
    /// `http://localhost:5000/api`)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Bearer credential of a logged-in user; anonymous when absent
    #[arg(long, global = true, env = "CARTSYNC_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// File holding the anonymous session token and user record
    #[arg(long, global = true, default_value = ".cartsync/state.json")]
    state_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cart operations
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
    /// Order history
    Orders {
        #[command(subcommand)]
        action: OrdersAction,
    },
    /// Local identity state
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
enum CartAction {
    /// Show cart lines and totals
    Show,
    /// Add a product to the cart
    Add {
        /// Product id
        product_id: String,

        /// Number of units
        #[arg(short, long, default_value_t = 1, allow_negative_numbers = true)]
        quantity: i64,

        /// Free-form note for the line
        #[arg(short, long)]
        notes: Option<String>,
    },
    /// Set a line's quantity
    Update {
        /// Cart line id
        line_id: String,

        /// New quantity (at least 1)
        #[arg(allow_negative_numbers = true)]
        quantity: i64,
    },
    /// Remove a line
    Remove {
        /// Cart line id
        line_id: String,
    },
    /// Remove every line
    Clear,
}

#[derive(Subcommand)]
enum OrdersAction {
    /// List your orders
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Show order count and total spent
    Summary,
    /// List every customer's orders (admin)
    Admin {
        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Show the stored session token and resolved user id
    Show,
    /// Save the user record from a login response
    SetUser {
        /// User record as a JSON object
        record: String,
    },
    /// Forget the session token and user record
    Forget,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CommandError> {
    let ctx = Context::new(cli.api_url.as_deref(), cli.token, &cli.state_file)?;

    match cli.command {
        Commands::Cart { action } => match action {
            CartAction::Show => commands::cart::show(&ctx).await?,
            CartAction::Add {
                product_id,
                quantity,
                notes,
            } => commands::cart::add(&ctx, &product_id, quantity, notes.as_deref()).await?,
            CartAction::Update { line_id, quantity } => {
                commands::cart::update(&ctx, &line_id, quantity).await?;
            }
            CartAction::Remove { line_id } => commands::cart::remove(&ctx, &line_id).await?,
            CartAction::Clear => commands::cart::clear(&ctx).await?,
        },
        Commands::Orders { action } => match action {
            OrdersAction::List { page, limit } => commands::orders::list(&ctx, page, limit).await?,
            OrdersAction::Summary => commands::orders::summary(&ctx).await?,
            OrdersAction::Admin { page, limit } => {
                commands::orders::admin(&ctx, page, limit).await?;
            }
        },
        Commands::Session { action } => match action {
            SessionAction::Show => commands::session::show(&ctx),
            SessionAction::SetUser { record } => commands::session::set_user(&ctx, &record)?,
            SessionAction::Forget => commands::session::forget(&ctx),
        },
    }
    Ok(())
}
