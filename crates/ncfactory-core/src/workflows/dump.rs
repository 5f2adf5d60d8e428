use crate::core::material::Info;
use crate::core::models::EKIN_TO_WL2;
use crate::core::models::Scatter;
use crate::core::models::scatter::{FreeGasScatter, PowderBraggScatter};
use std::fmt::Write;

const RULE: &str = "--------------------------------------------------------------------------------\n";
const SAMPLE_WAVELENGTHS_AA: [f64; 7] = [0.5, 1.0, 1.798, 2.5, 5.0, 10.0, 20.0];

/// Human-readable summary of an info object, one section per available property.
pub fn render(info: &Info) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_sections(&mut out, info);
    out
}

fn write_sections(out: &mut String, info: &Info) -> std::fmt::Result {
    write!(out, "{RULE}")?;
    writeln!(out, "Material : {}", info.material)?;
    writeln!(out, "Key      : {}", info.key)?;

    if let Some(structure) = &info.structure {
        write!(out, "{RULE}")?;
        writeln!(out, "Space group number : {}", structure.spacegroup)?;
        let [a, b, c] = structure.lattice;
        let [alpha, beta, gamma] = structure.angles;
        writeln!(out, "Lattice spacings   : {a} {b} {c} [Aa]")?;
        writeln!(out, "Lattice angles     : {alpha} {beta} {gamma} [deg]")?;
        writeln!(out, "Unit cell volume   : {:.6} [Aa^3]", structure.volume)?;
        writeln!(out, "Atoms / unit cell  : {}", structure.n_atoms)?;
    }

    if info.has_atom_info() {
        write!(out, "{RULE}")?;
        writeln!(out, "Atoms per unit cell (total is {}):", info.atoms.iter().map(|a| a.count()).sum::<usize>())?;
        for atom in &info.atoms {
            writeln!(out, "     {} {} atoms", atom.count(), atom.element.symbol)?;
        }
        writeln!(out, "Atomic coordinates:")?;
        for atom in &info.atoms {
            for p in &atom.positions {
                writeln!(out, "     {:>3}   {:>10.6}   {:>10.6}   {:>10.6}", atom.element.symbol, p.x, p.y, p.z)?;
            }
        }
    }

    write!(out, "{RULE}")?;
    writeln!(out, "Density : {} g/cm3", info.density)?;
    writeln!(out, "NumberDensity : {:.6} atoms/Aa3", info.number_density)?;

    write!(out, "{RULE}")?;
    writeln!(out, "Composition:")?;
    for entry in &info.composition {
        writeln!(out, " {:>20.4}% {}", entry.fraction * 100.0, entry.element.symbol)?;
    }

    write!(out, "{RULE}")?;
    writeln!(out, "Temperature : {} kelvin", info.temperature)?;
    if let Some(debye) = info.debye_temperature {
        writeln!(out, "Debye temperature (global) : {} kelvin", debye)?;
    }

    write!(out, "{RULE}")?;
    writeln!(out, "Neutron cross-sections:")?;
    writeln!(out, "   Absorption at 2200m/s : {:.4} barn", info.xsect_absorption)?;
    writeln!(out, "   Free scattering       : {:.4} barn", info.xsect_free)?;

    write!(out, "{RULE}")?;
    writeln!(out, "Scattering cross sections (Bragg + free) at a few wavelengths:")?;
    writeln!(out, "   lambda[Aa]  sigma_scat[barn]")?;
    let free = FreeGasScatter::from_info(info);
    let bragg = PowderBraggScatter::from_info(info);
    for wl in SAMPLE_WAVELENGTHS_AA {
        let ekin = EKIN_TO_WL2 / (wl * wl);
        let sigma = free.cross_section(ekin)
            + bragg.as_ref().map_or(0.0, |b| b.cross_section(ekin));
        writeln!(out, "{:>13} {:>17.6}", wl, sigma)?;
    }

    if info.has_hkl_info() {
        write!(out, "{RULE}")?;
        match info.dspacing_range {
            Some((lower, upper)) => writeln!(
                out,
                "HKL planes (d_lower = {} Aa, d_upper = {} Aa):",
                lower, upper
            )?,
            None => writeln!(out, "HKL planes:")?,
        }
        writeln!(out, "  H   K   L  d_hkl[Aa] Multiplicity FSquared[barn]")?;
        for plane in &info.hkl {
            let [h, k, l] = plane.hkl;
            writeln!(
                out,
                "{:>3} {:>3} {:>3} {:>10.6} {:>12} {:>14.6}",
                h, k, l, plane.dspacing, plane.multiplicity, plane.fsquared
            )?;
        }
    }
    write!(out, "{RULE}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FactoryContext;
    use crate::engine::config::FactoryConfig;

    #[test]
    fn crystal_dump_lists_structure_and_planes() {
        let ctx = FactoryContext::new(FactoryConfig::default());
        let info = ctx.create_info("Al_sg225.ncmat;dcutoff=1.5").unwrap();
        let text = render(&info);

        assert!(text.contains("Material : Al_sg225.ncmat"));
        assert!(text.contains("Space group number : 225"));
        assert!(text.contains("4 Al atoms"));
        assert!(text.contains("HKL planes (d_lower = 1.5 Aa"));
        let plane_rows = text
            .lines()
            .skip_while(|l| !l.starts_with("  H   K   L"))
            .skip(1)
            .take_while(|l| !l.starts_with('-'))
            .count();
        assert_eq!(plane_rows, info.hkl.len());
    }

    #[test]
    fn amorphous_dump_skips_crystal_sections() {
        let ctx = FactoryContext::new(FactoryConfig::default());
        let info = ctx.create_info("Polyethylene_CH2.ncmat").unwrap();
        let text = render(&info);

        assert!(!text.contains("Space group"));
        assert!(!text.contains("HKL planes"));
        assert!(text.contains("Composition:"));
        assert!(text.contains("Temperature : 293.15 kelvin"));
    }
}
