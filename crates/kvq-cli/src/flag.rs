use clap::Parser;
use kvq_core::options::{ByteOrder, RangeOpts, SingleOpts};

#[derive(Debug, Parser)]
#[command(name = "kvq")]
#[command(about = "A query language for ordered key-value stores")]
pub struct Flags {
    /// Path to the cluster file.
    #[arg(short, long)]
    pub cluster: Option<String>,

    /// Allow write queries.
    #[arg(short, long)]
    pub write: bool,

    /// Perform debug logging.
    #[arg(long)]
    pub log: bool,

    /// Query range-reads in reverse order.
    #[arg(short, long)]
    pub reverse: bool,

    /// Throw an error if a KV is read which doesn't match the schema.
    #[arg(short, long)]
    pub strict: bool,

    /// Encode/decode values as little endian.
    #[arg(short, long)]
    pub little: bool,

    /// Print full byte strings instead of just their length.
    #[arg(short, long)]
    pub bytes: bool,

    /// Limit the number of KVs read in range-reads.
    #[arg(long, default_value_t = 0)]
    pub limit: usize,

    /// The queries to execute, in order.
    #[arg(required = true)]
    pub queries: Vec<String>,
}

impl Flags {
    pub fn byte_order(&self) -> ByteOrder {
        if self.little {
            ByteOrder::Little
        } else {
            ByteOrder::Big
        }
    }

    pub fn single_opts(&self) -> SingleOpts {
        SingleOpts {
            byte_order: self.byte_order(),
            filter: !self.strict,
        }
    }

    pub fn range_opts(&self) -> RangeOpts {
        RangeOpts {
            byte_order: self.byte_order(),
            reverse: self.reverse,
            filter: !self.strict,
            limit: self.limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_read_friendly() {
        let flags = Flags::parse_from(["kvq", "/a{1}"]);
        assert!(!flags.write);
        assert!(!flags.strict);
        assert_eq!(flags.byte_order(), ByteOrder::Big);
        assert!(flags.single_opts().filter);
        assert!(flags.range_opts().filter);
        assert_eq!(flags.range_opts().limit, 0);
    }

    #[test]
    fn strict_and_little_map_through() {
        let flags = Flags::parse_from(["kvq", "-s", "-l", "-r", "--limit", "7", "/a{1}"]);
        assert!(!flags.single_opts().filter);
        assert!(!flags.range_opts().filter);
        assert!(flags.range_opts().reverse);
        assert_eq!(flags.range_opts().limit, 7);
        assert_eq!(flags.byte_order(), ByteOrder::Little);
    }

    #[test]
    fn queries_are_positional_and_ordered() {
        let flags = Flags::parse_from(["kvq", "-w", "/a{1}=2", "/a{1}=<int>"]);
        assert_eq!(flags.queries, vec!["/a{1}=2", "/a{1}=<int>"]);
    }
}
