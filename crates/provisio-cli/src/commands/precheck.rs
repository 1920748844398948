use provisio_core::ProvisioConfig;
use provisio_precheck::Prechecker;

use super::print_json;

pub async fn run(config: &ProvisioConfig, json: bool) -> anyhow::Result<()> {
    let report = Prechecker::with_process_runner(config.precheck.clone())
        .check_all()
        .await;

    if json {
        return print_json(&report);
    }

    let mark = |ok: bool| if ok { "✓" } else { "✗" };
    println!("{} VM {}: {}", mark(report.vm.is_running), report.vm.vm_name, report.vm.status);
    println!(
        "{} Orchestrator: {}",
        mark(report.orchestrator.is_running),
        report.orchestrator.status
    );
    match (&report.ssh.host, report.ssh.port) {
        (Some(host), Some(port)) => println!(
            "{} SSH {host}:{port}: {}",
            mark(report.ssh.available),
            report.ssh.status
        ),
        _ => println!("{} SSH: {}", mark(report.ssh.available), report.ssh.status),
    }
    println!(
        "{} Network: {} ({}/{} connected)",
        mark(report.network.required_services_ok),
        report.network.status,
        report.network.connected_count,
        report.network.total_count
    );
    for svc in &report.network.services {
        println!("    {} {} {}:{}", mark(svc.available), svc.label, svc.host, svc.port);
    }

    println!();
    println!("Overall: {}", report.overall.status);
    for hint in report.hints() {
        println!("  hint: {hint}");
    }
    Ok(())
}
