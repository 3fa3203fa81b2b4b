mod flag;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use kvq_core::facade::{memory::MemoryDatabase, path_str};
use kvq_core::keyval::class::{classify, Class};
use kvq_core::parser::format::{Cfg, Format};
use kvq_core::parser::parse_query;
use kvq_core::Engine;

use flag::Flags;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("kvq: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let flags = Flags::parse();

    if flags.log {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kvq_core=debug")),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    if let Some(cluster) = &flags.cluster {
        warn!(cluster = %cluster, "cluster files are not supported by the embedded backend; ignoring");
    }

    let engine = Engine::new(MemoryDatabase::new());
    let mut fmt = Format::new(Cfg {
        print_bytes: flags.bytes,
    });

    for query in &flags.queries {
        execute(&engine, &flags, &mut fmt, query)
            .await
            .with_context(|| format!("failed to execute '{query}'"))?;
    }
    Ok(())
}

async fn execute(
    engine: &Engine<MemoryDatabase>,
    flags: &Flags,
    fmt: &mut Format,
    input: &str,
) -> Result<()> {
    let query = parse_query(input)?;

    match classify(query)? {
        Class::Set(kv) => {
            if !flags.write {
                bail!("write queries are disabled; pass --write to enable them");
            }
            engine.set(kv, flags.byte_order())?;
        }
        Class::Clear(kv) => {
            if !flags.write {
                bail!("write queries are disabled; pass --write to enable them");
            }
            engine.clear(kv)?;
        }
        Class::SingleRead(kv) => {
            if let Some(kv) = engine.single_read(kv, flags.single_opts())? {
                fmt.reset();
                fmt.key_value(&kv);
                println!("{}", fmt.string());
            }
        }
        Class::RangeRead(kv) => {
            let cancel = CancellationToken::new();
            let mut rows = engine.range_read(cancel, kv, flags.range_opts());
            while let Some(msg) = rows.recv().await {
                let kv = msg?;
                fmt.reset();
                fmt.key_value(&kv);
                println!("{}", fmt.string());
            }
        }
        Class::Directories(dir) => {
            let cancel = CancellationToken::new();
            let mut dirs = engine.directories(cancel, dir);
            while let Some(msg) = dirs.recv().await {
                let dir = msg?;
                println!("{}", path_str(dir.path()));
            }
        }
    }
    Ok(())
}
