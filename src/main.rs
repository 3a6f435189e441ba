fn main() {
    if let Err(err) = nested_graph_view::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
