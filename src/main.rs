//! Daemon entrypoint: install logging, install the `SIGINT` handler, then
//! run the accept loop (§4.8) until told to stop.

use zfs_helper::config::Config;
use zfs_helper::logging;
use zfs_helper::server;

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, server::request_shutdown as libc::sighandler_t);
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

fn main() {
    logging::init();
    install_signal_handlers();

    let config = Config::from_env();
    if let Err(err) = server::run(&config) {
        log::error!("zfs-helper [ERROR] server exception: {err}");
        std::process::exit(1);
    }
}
