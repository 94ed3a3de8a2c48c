use clap::{Arg, ArgAction, Command};
use tracing::Level;

pub fn cli() -> Command {
    Command::new("p2p-node")
        .about("Ethereum devp2p wire-protocol node")
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .default_value(Level::INFO.as_str())
                .value_name("LOG_LEVEL")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("p2p.addr")
                .long("p2p.addr")
                .default_value("0.0.0.0")
                .value_name("ADDRESS")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("p2p.port")
                .long("p2p.port")
                .default_value("30303")
                .value_name("PORT")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("discovery.addr")
                .long("discovery.addr")
                .default_value("0.0.0.0")
                .value_name("ADDRESS")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("discovery.port")
                .long("discovery.port")
                .default_value("30303")
                .value_name("PORT")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("node-key")
                .long("node-key")
                .value_name("NODE_KEY_PATH")
                .help("Path to a 32-byte hex-encoded secp256k1 key; a random one is generated and printed if omitted")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("bootnodes")
                .long("bootnodes")
                .value_name("BOOTNODE_LIST")
                .value_delimiter(',')
                .num_args(1..)
                .action(ArgAction::Set),
        )
}
