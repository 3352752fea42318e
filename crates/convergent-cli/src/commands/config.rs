use convergent_config::HarnessConfig;

pub fn run(config: &HarnessConfig) -> Result<(), Box<dyn std::error::Error>> {
    let effective = config.effective();

    // Print as YAML for readability
    let yaml = effective.to_yaml()?;
    println!("{}", yaml);

    Ok(())
}
