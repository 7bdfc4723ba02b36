use anyhow::Context;
use stitch_core::{DataSource, MappingConfig, StitchKey, Stitcher, StitcherConfig};

const MAPPING: &str = r#"
[[fields]]
field = "unii"
key = "I_UNII"

[[fields]]
field = "parent"
key = "R_activeMoiety"

[[fields]]
field = "names"
key = "N_Name"

[[patterns]]
field = "codes"
key = "I_CAS"
regex = '^CAS:(\d+-\d+-\d)$'

[[blacklist]]
key = "N_Name"
values = ["UNKNOWN"]
"#;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("=== Stitch: resolve one component ===\n");

    let stitcher = Stitcher::in_memory(StitcherConfig::default())?;
    stitcher.register_source(DataSource::new("gsrs", "GSRS").with_id_field("uuid"))?;
    stitcher.register_source(DataSource::new("drugbank", "DrugBank").with_id_field("id"))?;

    let mapping = MappingConfig::from_toml_str(MAPPING)?.compile()?;

    let records = [
        (
            "gsrs",
            serde_json::json!({
                "uuid": "g-1",
                "unii": "R16CO5Y76E",
                "parent": "R16CO5Y76E",
                "names": ["ASPIRIN", "ACETYLSALICYLIC ACID"],
                "codes": ["CAS:50-78-2"]
            }),
        ),
        (
            "gsrs",
            serde_json::json!({
                "uuid": "g-2",
                "unii": "2I3O8M1YZE",
                "parent": "R16CO5Y76E",
                "names": ["ASPIRIN SODIUM"]
            }),
        ),
        (
            "drugbank",
            serde_json::json!({
                "id": "DB00945",
                "names": ["ASPIRIN", "UNKNOWN"],
                "codes": "CAS:50-78-2"
            }),
        ),
        (
            "drugbank",
            serde_json::json!({
                "id": "DB00316",
                "names": ["ACETAMINOPHEN", "ACETYLSALICYLIC ACID"]
            }),
        ),
    ];

    println!("1. Ingesting {} records...", records.len());
    let mut seed = None;
    for (source, payload) in &records {
        let ingested = stitcher
            .ingest(source, payload, &mapping)
            .with_context(|| format!("ingesting {} record", source))?;
        println!(
            "   {}:{} -> {} ({} new edges)",
            source, ingested.record_id, ingested.entity, ingested.edges
        );
        seed.get_or_insert(ingested.entity);
    }
    let seed = seed.context("no records ingested")?;

    println!("\n2. Neighbors of the first record:");
    for ((key, value), ids) in stitcher.expand(seed)? {
        println!("   {} = {}: {} entities", key, value, ids.len());
    }

    println!("\n3. Cliques over CAS and names:");
    let component = stitcher.component(seed)?;
    let nodes: Vec<_> = component.nodes().collect();
    stitcher.cliques(&nodes, &[StitchKey::Cas, StitchKey::Name], |clique| {
        println!("   {} members, score {:.2}", clique.size(), clique.score());
        true
    })?;

    println!("\n4. Untangling...");
    let report = stitcher.resolve_component(seed, |stitch| {
        println!(
            "   stitch {} root {} members {} labels {:?}",
            stitch.id,
            stitch.root,
            stitch.size(),
            stitch.labels
        );
    })?;
    for anomaly in &report.anomalies {
        println!("   anomaly: {}", anomaly);
    }
    println!("\n{}", report.metrics.summary());

    Ok(())
}
