use tokio::runtime::Builder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Builder::new_multi_thread()
        .worker_threads(num_cpus::get().max(2))
        .thread_name("realm-worker")
        .enable_all()
        .build()?;

    runtime.block_on(lib_realm::init())
}
