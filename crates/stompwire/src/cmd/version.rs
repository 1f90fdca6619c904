use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("stompwire {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: stompwire");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("STOMPWIRE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "profile: {}",
        option_env!("STOMPWIRE_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!(
        "features: session={}, websocket={}, async={}, cli=true",
        cfg!(feature = "session"),
        cfg!(feature = "websocket"),
        cfg!(feature = "async")
    );
    println!("protocol: STOMP 1.0, 1.1, 1.2");

    Ok(SUCCESS)
}
