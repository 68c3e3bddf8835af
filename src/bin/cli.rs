use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use prettytable::{Cell, Row, Table};
use serde::Deserialize;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "docsearch")]
#[command(about = "A CLI tool for searching and tagging indexed documents", long_about = None)]
struct Cli {
    #[arg(long, env = "DOCSEARCH_API_URL", default_value = "http://localhost:8004")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Search documents, e.g. 'invoice author:john size>1M'")]
    Search {
        query: String,

        #[arg(short, long, default_value_t = 0)]
        page: usize,

        #[arg(short, long, default_value_t = 10)]
        size: usize,
    },

    #[command(about = "List tags with their file counts")]
    Tags,

    #[command(about = "Add a manual tag to a file")]
    Tag { file_id: String, name: String },

    #[command(about = "Remove a manual tag from a file")]
    Untag { file_id: String, name: String },

    #[command(about = "Show processing statistics for the last 30 days")]
    Stats,
}

#[derive(Debug, Deserialize)]
struct Meta {
    short_name: String,
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct TagRef {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Hit {
    file_id: String,
    meta: Meta,
    content: Content,
    #[serde(default)]
    tags: Vec<TagRef>,
}

#[derive(Debug, Deserialize)]
struct SearchResults {
    total: u64,
    took: u64,
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TagCount {
    name: String,
    #[serde(rename = "type")]
    tag_type: String,
    files_count: u64,
}

#[derive(Debug, Deserialize)]
struct TagList {
    tags: Vec<TagCount>,
}

#[derive(Debug, Deserialize)]
struct ProcRate {
    data: Vec<serde_json::Map<String, Value>>,
    names: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcTotal {
    total_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsSeries {
    proc_rate: ProcRate,
    proc_total: ProcTotal,
}

struct Client {
    http: reqwest::Client,
    base: String,
}

impl Client {
    fn new(base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    async fn send<T: serde::de::DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> anyhow::Result<T> {
        let response = request.send().await.context("Failed to reach the search service")?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            bail!("Request failed ({}): {}", status, error_text);
        }
        Ok(response.json().await?)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        self.send(self.http.get(format!("{}{}", self.base, path))).await
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let client = Client::new(&cli.api_url);

    let result = match cli.command {
        Commands::Search { query, page, size } => search(&client, &query, page, size).await,
        Commands::Tags => list_tags(&client).await,
        Commands::Tag { file_id, name } => change_tag(&client, &file_id, &name, true).await,
        Commands::Untag { file_id, name } => change_tag(&client, &file_id, &name, false).await,
        Commands::Stats => show_stats(&client).await,
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {:#}", e);
        std::process::exit(1);
    }
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

async fn search(client: &Client, query: &str, page: usize, size: usize) -> anyhow::Result<()> {
    let request = client
        .http
        .get(format!("{}/api/search", client.base))
        .query(&[("query", query.to_string()), ("page", page.to_string()), ("size", size.to_string())]);
    let result: SearchResults = client.send(request).await?;

    if result.hits.is_empty() {
        println!("📭 No documents found.");
        return Ok(());
    }

    println!("\n🔎 {} documents found ({} ms), page {}\n", result.total, result.took, page);

    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("ID"),
        Cell::new("Name"),
        Cell::new("Path"),
        Cell::new("Size"),
        Cell::new("Tags"),
    ]));

    for hit in result.hits {
        let tags = hit.tags.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(", ");
        let short_id: String = hit.file_id.chars().take(8).collect();
        table.add_row(Row::new(vec![
            Cell::new(&short_id),
            Cell::new(&hit.meta.short_name),
            Cell::new(&hit.meta.full_name),
            Cell::new(&human_size(hit.content.size)),
            Cell::new(&tags),
        ]));
    }

    table.printstd();
    println!();
    Ok(())
}

fn print_tags(tags: &[TagCount]) {
    let mut table = Table::new();
    table.add_row(Row::new(vec![Cell::new("Tag"), Cell::new("Type"), Cell::new("Files")]));
    for tag in tags {
        table.add_row(Row::new(vec![
            Cell::new(&tag.name),
            Cell::new(&tag.tag_type),
            Cell::new(&tag.files_count.to_string()),
        ]));
    }
    table.printstd();
}

async fn list_tags(client: &Client) -> anyhow::Result<()> {
    let tags: Vec<TagCount> = client.get("/api/tags").await?;
    if tags.is_empty() {
        println!("📭 No tags yet.");
        return Ok(());
    }
    println!("\n🏷️  Tags ({})\n", tags.len());
    print_tags(&tags);
    println!();
    Ok(())
}

async fn change_tag(client: &Client, file_id: &str, name: &str, add: bool) -> anyhow::Result<()> {
    let url = format!("{}/api/tags/{}/manual/{}", client.base, file_id, name);
    let request = if add { client.http.post(url) } else { client.http.delete(url) };
    let result: TagList = client.send(request).await?;

    if add {
        println!("✅ Tag '{}' added to {}", name, file_id);
    } else {
        println!("✅ Tag '{}' removed from {}", name, file_id);
    }
    print_tags(&result.tags);
    Ok(())
}

async fn show_stats(client: &Client) -> anyhow::Result<()> {
    let stats: StatsSeries = client.get("/api/stats").await?;

    println!("\n📊 {} documents processed\n", stats.proc_total.total_count);

    let mut header = vec![Cell::new("Date")];
    header.extend(stats.proc_rate.names.iter().map(|n| Cell::new(n)));
    let mut table = Table::new();
    table.add_row(Row::new(header));

    for day in &stats.proc_rate.data {
        let date = day.get("date").and_then(Value::as_str).unwrap_or("-");
        let mut row = vec![Cell::new(date)];
        for name in &stats.proc_rate.names {
            let count = day.get(name).and_then(Value::as_u64).unwrap_or(0);
            row.push(Cell::new(&count.to_string()));
        }
        table.add_row(Row::new(row));
    }

    table.printstd();
    println!();
    Ok(())
}
