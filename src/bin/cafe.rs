use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use cafe_query::http::DEFAULT_BASE_URL;
use cafe_query::schema::CategoryInput;
use cafe_query::schema::Credentials;
use cafe_query::schema::Post;
use cafe_query::schema::PostFilter;
use cafe_query::token::FileTokenStore;
use cafe_query::token::MemoryTokenStore;
use cafe_query::HttpConfig;
use cafe_query::Storefront;
use cafe_query::TokenStore;
use clap::Parser;
use clap::Subcommand;
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Command line access to the coffee-shop storefront backend.
#[derive(Debug, Clone, Parser)]
#[clap(about, version, name = "cafe")]
struct Cli {
    /// Base URL of the storefront API.
    #[clap(long, env = "CAFE_API_URL", default_value = DEFAULT_BASE_URL)]
    api_url: String,

    /// File keeping the auth token between runs. Without it the token lives only as long as the command.
    #[clap(long, env = "CAFE_TOKEN_FILE")]
    token_file: Option<PathBuf>,

    /// Request timeout in seconds.
    #[clap(long, env = "CAFE_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// List categories.
    Categories,
    /// List products, optionally filtered.
    Products {
        #[clap(long)]
        category: Option<u64>,
        #[clap(long)]
        search: Option<String>,
        #[clap(long)]
        min_price: Option<f64>,
        #[clap(long)]
        max_price: Option<f64>,
    },
    /// List featured products.
    Featured,
    /// List products running low.
    LowStock,
    /// Show inventory statistics.
    Dashboard,
    /// Log in and keep the token.
    Login {
        #[clap(long)]
        email: String,
        #[clap(long, env = "CAFE_PASSWORD")]
        password: String,
    },
    /// Log out and forget the token.
    Logout,
    /// Create a category.
    AddCategory {
        #[clap(long)]
        name: String,
        #[clap(long)]
        parent: Option<u64>,
    },
}

fn setup_tracing() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()?;
    Ok(())
}

fn storefront(cli: &Cli) -> Result<Storefront> {
    let tokens: Arc<dyn TokenStore> = match &cli.token_file {
        Some(path) => Arc::new(FileTokenStore::open(path)?),
        None => Arc::new(MemoryTokenStore::new()),
    };

    let mut config = HttpConfig::new(cli.api_url.clone());
    if let Some(secs) = cli.timeout_secs {
        config = config.with_timeout(Duration::from_secs(secs));
    }
    debug!(?config, "connecting");

    Storefront::connect(&config, tokens).context("failed to set up the API client")
}

fn print_posts(posts: &[Post]) {
    for post in posts {
        println!(
            "{:>5}  {:<40} {:>9.2} {:>5}  {}",
            post.id,
            post.title,
            post.price,
            post.quantity,
            post.stock_level()
        );
    }
}

async fn run(cli: Cli) -> Result<()> {
    let store = storefront(&cli)?;

    match cli.command {
        Command::Categories => {
            for category in store.categories().await? {
                match category.parent_id {
                    Some(parent) => println!("{:>5}  {} (in {parent})", category.id, category.name),
                    None => println!("{:>5}  {}", category.id, category.name),
                }
            }
        }
        Command::Products {
            category,
            search,
            min_price,
            max_price,
        } => {
            let filter = PostFilter {
                category_id: category,
                search,
                min_price,
                max_price,
            };
            let listing = store.posts(&filter).await?;
            print_posts(listing.items());
            println!("{} of {} products", listing.items().len(), listing.total());
        }
        Command::Featured => print_posts(&store.featured_posts().await?),
        Command::LowStock => print_posts(&store.low_stock_posts().await?),
        Command::Dashboard => {
            let stats = store.dashboard().await?;
            println!("products:      {}", stats.total_products);
            println!(
                "categories:    {} ({} main, {} sub)",
                stats.total_categories, stats.main_categories, stats.sub_categories
            );
            println!(
                "stock:         {} in stock, {} low, {} out",
                stats.in_stock, stats.low_stock, stats.out_of_stock
            );
            println!("total value:   {:.2}", stats.total_value);
            for top in &stats.top_categories {
                println!("  {:<30} {}", top.category.name, top.product_count);
            }
        }
        Command::Login { email, password } => {
            let response = store.login().mutate(Credentials::new(email, password)).await?;
            match response.user {
                Some(user) => println!("logged in as {}", user.name),
                None => println!("logged in"),
            }
            if cli.token_file.is_none() {
                eprintln!("no token file configured, the session ends with this command");
            }
        }
        Command::Logout => {
            store.logout().mutate(()).await?;
            println!("logged out");
        }
        Command::AddCategory { name, parent } => {
            let mut input = CategoryInput::new(name);
            input.parent_id = parent;
            let category = store.create_category().mutate(input).await?;
            println!("created category {} ({})", category.name, category.id);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing()?;
    run(Cli::parse()).await
}
