use crate::components::bgp::bgp_rib::TableOverview;
use crate::components::bgp::outbound::OutboundStore;

pub fn rib_overview(tables: &[TableOverview]) -> String {
    let mut output = String::new();
    output.push_str("BGP RIB Overview:\n");
    output.push_str("┌──────────────────┬──────────────┬──────────────┬──────────────┬──────────────┐\n");
    output.push_str("│      Table       │ Destinations │    Paths     │  Best paths  │   Routers    │\n");
    output.push_str("├──────────────────┼──────────────┼──────────────┼──────────────┼──────────────┤\n");

    for table in tables {
        let mut name = table.table.to_string();
        if table.add_path {
            name.push_str(" +ap");
        }
        output.push_str(&format!(
            "│ {:<16} │ {:>12} │ {:>12} │ {:>12} │ {:>12} │\n",
            name, table.destinations, table.paths, table.best_paths, table.contributors
        ));
    }

    let destinations: usize = tables.iter().map(|table| table.destinations).sum();
    let paths: usize = tables.iter().map(|table| table.paths).sum();
    let best_paths: usize = tables.iter().map(|table| table.best_paths).sum();

    output.push_str("├──────────────────┼──────────────┼──────────────┼──────────────┼──────────────┤\n");
    output.push_str(&format!(
        "│ {:<16} │ {:>12} │ {:>12} │ {:>12} │ {:>12} │\n",
        "Total", destinations, paths, best_paths, ""
    ));
    output.push_str("└──────────────────┴──────────────┴──────────────┴──────────────┴──────────────┘\n");

    output
}

pub fn outbound_overview(store: &OutboundStore) -> String {
    let mut output = String::new();
    output.push_str("Outbound Overview:\n");
    output.push_str("┌────────────────────────────────┬──────────────┐\n");
    output.push_str("│             Target             │    Routes    │\n");
    output.push_str("├────────────────────────────────┼──────────────┤\n");
    for target in store.targets() {
        output.push_str(&format!(
            "│ {:<30} │ {:>12} │\n",
            target.to_string(),
            store.len(target)
        ));
    }
    output.push_str("└────────────────────────────────┴──────────────┘\n");
    output
}
