//! Database and transaction options.
//!
//! Each option is a row in a static table: name, native code and parameter
//! shape. The tables, the option enums and the typed setter facades are
//! all produced by one macro so they cannot drift apart.
//!
//! Integer parameters are handed to the backend as 8-byte little-endian
//! values; string and byte parameters are passed through as-is.
//!
//! Options take effect as of the first operation that depends on them, so
//! set them before issuing reads or writes.

use crate::database::Database;
use crate::error::Result;
use crate::transaction::Transaction;

/// Parameter shape of an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    /// Flag option, no parameter.
    None,
    /// Signed 64-bit integer, sent little-endian.
    Int,
    /// Raw bytes.
    Bytes,
    /// UTF-8 text.
    String,
}

/// One row of an option table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OptionSpec {
    /// Snake-case option name.
    pub name: &'static str,
    /// Native option code.
    pub code: i32,
    /// Parameter shape.
    pub kind: ParamKind,
}

macro_rules! option_table {
    (
        $(#[$meta:meta])*
        pub enum $name:ident for $target:ident, facade $facade:ident {
            flags {
                $( $(#[$fdoc:meta])* $flag:ident = $fcode:literal, $fname:literal, $fset:ident; )*
            }
            ints {
                $( $(#[$idoc:meta])* $int:ident = $icode:literal, $iname:literal, $iset:ident; )*
            }
            strings {
                $( $(#[$sdoc:meta])* $string:ident = $scode:literal, $sname:literal, $sset:ident; )*
            }
            bytes {
                $( $(#[$bdoc:meta])* $bytes:ident = $bcode:literal, $bname:literal, $bset:ident; )*
            }
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$fdoc])* $flag, )*
            $( $(#[$idoc])* $int(i64), )*
            $( $(#[$sdoc])* $string(String), )*
            $( $(#[$bdoc])* $bytes(Vec<u8>), )*
        }

        impl $name {
            /// Every option in this table.
            pub const SPECS: &'static [OptionSpec] = &[
                $( OptionSpec { name: $fname, code: $fcode, kind: ParamKind::None }, )*
                $( OptionSpec { name: $iname, code: $icode, kind: ParamKind::Int }, )*
                $( OptionSpec { name: $sname, code: $scode, kind: ParamKind::String }, )*
                $( OptionSpec { name: $bname, code: $bcode, kind: ParamKind::Bytes }, )*
            ];

            /// Looks up a table row by native code.
            #[must_use]
            pub fn spec_for_code(code: i32) -> Option<&'static OptionSpec> {
                Self::SPECS.iter().find(|spec| spec.code == code)
            }

            /// Native option code.
            #[must_use]
            pub fn code(&self) -> i32 {
                match self {
                    $( Self::$flag => $fcode, )*
                    $( Self::$int(_) => $icode, )*
                    $( Self::$string(_) => $scode, )*
                    $( Self::$bytes(_) => $bcode, )*
                }
            }

            /// Table row for this option.
            #[must_use]
            pub fn spec(&self) -> &'static OptionSpec {
                match self {
                    $( Self::$flag => &OptionSpec { name: $fname, code: $fcode, kind: ParamKind::None }, )*
                    $( Self::$int(_) => &OptionSpec { name: $iname, code: $icode, kind: ParamKind::Int }, )*
                    $( Self::$string(_) => &OptionSpec { name: $sname, code: $scode, kind: ParamKind::String }, )*
                    $( Self::$bytes(_) => &OptionSpec { name: $bname, code: $bcode, kind: ParamKind::Bytes }, )*
                }
            }

            /// Parameter bytes as handed to the backend.
            #[must_use]
            pub fn encode_param(&self) -> Option<Vec<u8>> {
                match self {
                    $( Self::$flag => None, )*
                    $( Self::$int(value) => Some(value.to_le_bytes().to_vec()), )*
                    $( Self::$string(value) => Some(value.as_bytes().to_vec()), )*
                    $( Self::$bytes(value) => Some(value.clone()), )*
                }
            }
        }

        #[doc = concat!("Typed setters for [`", stringify!($name), "`].")]
        #[derive(Debug, Clone, Copy)]
        pub struct $facade<'a> {
            target: &'a $target,
        }

        impl<'a> $facade<'a> {
            pub(crate) fn new(target: &'a $target) -> Self {
                Self { target }
            }

            $(
                $(#[$fdoc])*
                pub fn $fset(&self) -> Result<()> {
                    self.target.set_option($name::$flag)
                }
            )*
            $(
                $(#[$idoc])*
                pub fn $iset(&self, value: i64) -> Result<()> {
                    self.target.set_option($name::$int(value))
                }
            )*
            $(
                $(#[$sdoc])*
                pub fn $sset(&self, value: impl Into<String>) -> Result<()> {
                    self.target.set_option($name::$string(value.into()))
                }
            )*
            $(
                $(#[$bdoc])*
                pub fn $bset(&self, value: impl Into<Vec<u8>>) -> Result<()> {
                    self.target.set_option($name::$bytes(value.into()))
                }
            )*
        }
    };
}

option_table! {
    /// Options scoped to a database handle.
    pub enum DatabaseOption for Database, facade DatabaseOptions {
        flags {}
        ints {
            /// Number of shard locations to cache.
            LocationCacheSize = 10, "location_cache_size", set_location_cache_size;
            /// Maximum number of outstanding watches.
            MaxWatches = 20, "max_watches", set_max_watches;
        }
        strings {
            /// Machine identifier used for locality-aware routing.
            MachineId = 21, "machine_id", set_machine_id;
            /// Datacenter identifier used for locality-aware routing.
            DatacenterId = 22, "datacenter_id", set_datacenter_id;
        }
        bytes {}
    }
}

option_table! {
    /// Options scoped to a single transaction.
    ///
    /// Options are cleared by `reset` but survive a successful `on_error`.
    pub enum TransactionOption for Transaction, facade TransactionOptions {
        flags {
            /// Allow commits to be acknowledged before they are fully durable.
            CausalWriteRisky = 10, "causal_write_risky", set_causal_write_risky;
            /// Allow reads that may miss very recent commits.
            CausalReadRisky = 20, "causal_read_risky", set_causal_read_risky;
            /// Skip causal read consistency.
            CausalReadDisable = 21, "causal_read_disable", set_causal_read_disable;
            /// The next write adds no write conflict range.
            NextWriteNoWriteConflictRange = 30, "next_write_no_write_conflict_range", set_next_write_no_write_conflict_range;
            /// Commit through the first proxy only.
            CommitOnFirstProxy = 40, "commit_on_first_proxy", set_commit_on_first_proxy;
            /// Check that writes are well-formed at commit.
            CheckWritesEnable = 50, "check_writes_enable", set_check_writes_enable;
            /// Reads do not see this transaction's own writes.
            ReadYourWritesDisable = 51, "read_your_writes_disable", set_read_your_writes_disable;
            /// Disable read-ahead for range reads.
            ReadAheadDisable = 52, "read_ahead_disable", set_read_ahead_disable;
            /// Durable once committed in the local datacenter.
            DurabilityDatacenter = 110, "durability_datacenter", set_durability_datacenter;
            /// Durable once in memory on the storage servers.
            DurabilityRisky = 120, "durability_risky", set_durability_risky;
            /// Immediate system priority.
            PrioritySystemImmediate = 200, "priority_system_immediate", set_priority_system_immediate;
            /// Batch priority.
            PriorityBatch = 201, "priority_batch", set_priority_batch;
            /// This transaction initializes a new database.
            InitializeNewDatabase = 300, "initialize_new_database", set_initialize_new_database;
            /// Allow reads and writes in the system key space.
            AccessSystemKeys = 301, "access_system_keys", set_access_system_keys;
            /// Allow reads in the system key space.
            ReadSystemKeys = 302, "read_system_keys", set_read_system_keys;
            /// Snapshot reads see this transaction's writes.
            SnapshotRywEnable = 600, "snapshot_ryw_enable", set_snapshot_ryw_enable;
            /// Snapshot reads ignore this transaction's writes.
            SnapshotRywDisable = 601, "snapshot_ryw_disable", set_snapshot_ryw_disable;
            /// Proceed even if the database is locked.
            LockAware = 700, "lock_aware", set_lock_aware;
        }
        ints {
            /// Deadline in milliseconds for the transaction, including retries through `on_error`. `0` disables it.
            Timeout = 500, "timeout", set_timeout;
            /// Maximum number of retries `on_error` allows. `-1` disables the limit.
            RetryLimit = 501, "retry_limit", set_retry_limit;
            /// Upper bound in milliseconds on the backoff between retries.
            MaxRetryDelay = 502, "max_retry_delay", set_max_retry_delay;
        }
        strings {
            /// Tag retried attempts in the backend's debug log.
            DebugRetryLogging = 401, "debug_retry_logging", set_debug_retry_logging;
            /// Enable backend transaction logging under the given identifier.
            TransactionLoggingEnable = 402, "transaction_logging_enable", set_transaction_logging_enable;
        }
        bytes {}
    }
}
