//! Templates taken from the calculation catalogue, used across the test suites.
use crate::store::{DataType, Parameter, ParameterScope, Template};

fn input(name: &str) -> Parameter {
    Parameter::new(name, DataType::Number, ParameterScope::Input).required()
}

fn output(name: &str, data_type: DataType) -> Parameter {
    Parameter::new(name, data_type, ParameterScope::Output).required()
}

/// "Cálculo de Rampas Accesibles". The 1200 mm width is a reportable code
/// minimum, so `anchoRampa` is advisory.
pub fn ramp() -> Template {
    let formula = r#"
        const pendientePorcentaje = (alturaRampa / longitudHorizontal) * 100;
        const pendienteMaxima = pendienteMaximaPermitida(alturaRampa);
        const cumplePendiente = pendientePorcentaje <= pendienteMaxima;
        const cumpleAnchoMinimo = anchoRampa >= 1200;
        const cumpleTransversal = pendienteTransversal <= 2;
        return {
            pendientePorcentaje,
            pendienteMaxima,
            cumplePendiente,
            cumpleAnchoMinimo,
            cumplimientoTotal: cumplePendiente && cumpleAnchoMinimo && cumpleTransversal
        };
    "#;
    // Maximum slope by level difference (mm).
    let table = r#"
        function pendienteMaximaPermitida(altura) {
            if (altura <= 300) return 12;
            if (altura <= 750) return 10;
            if (altura <= 1200) return 8;
            if (altura <= 1800) return 6;
            return 4;
        }
    "#;
    Template::new("tpl-rampas", "Cálculo de Rampas Accesibles", formula)
        .with_version(3)
        .with_parameter(input("alturaRampa").with_unit("mm").with_range(Some(0.0), None).ordered(1))
        .with_parameter(input("longitudHorizontal").with_unit("mm").with_range(Some(1.0), None).ordered(2))
        .with_parameter(input("pendienteTransversal").with_unit("%").with_range(Some(0.0), Some(2.0)).ordered(3))
        .with_parameter(input("anchoRampa").with_unit("mm").with_range(Some(1200.0), None).advisory().ordered(4))
        .with_parameter(
            Parameter::new("pendienteMaximaPermitida", DataType::Number, ParameterScope::Internal)
                .with_formula(table)
                .ordered(5),
        )
        .with_parameter(output("pendientePorcentaje", DataType::Number).with_unit("%").ordered(6))
        .with_parameter(output("pendienteMaxima", DataType::Number).with_unit("%").ordered(7))
        .with_parameter(output("cumplePendiente", DataType::Boolean).ordered(8))
        .with_parameter(output("cumpleAnchoMinimo", DataType::Boolean).ordered(9))
        .with_parameter(output("cumplimientoTotal", DataType::Boolean).ordered(10))
}

/// "Cálculo de Cargas Muertas". `area` is produced by its own formula and
/// read by the main formula.
pub fn dead_loads() -> Template {
    let formula = r#"
        const cargaMuertaUnitaria = cargaElementosEstructurales + cargaAcabados + cargaParedes + cargaInstalaciones;
        return { cargaMuertaUnitaria, cargaMuertaTotal: area * cargaMuertaUnitaria };
    "#;
    Template::new("tpl-cargas", "Cálculo de Cargas Muertas", formula)
        .with_parameter(input("longitud").with_unit("m").with_range(Some(0.0), None))
        .with_parameter(input("ancho").with_unit("m").with_range(Some(0.0), None))
        .with_parameter(input("cargaElementosEstructurales").with_unit("kN/m2"))
        .with_parameter(input("cargaAcabados").with_unit("kN/m2"))
        .with_parameter(input("cargaParedes").with_unit("kN/m2"))
        .with_parameter(input("cargaInstalaciones").with_unit("kN/m2"))
        .with_parameter(output("area", DataType::Number).with_unit("m2").with_formula("longitud * ancho"))
        .with_parameter(output("cargaMuertaTotal", DataType::Number).with_unit("kN"))
        .with_parameter(output("cargaMuertaUnitaria", DataType::Number).with_unit("kN/m2"))
}

/// Spectral acceleration per period. The helper reads `Z`, `U`, `S`, `R`,
/// `Tp` and `TL` without declaring them.
pub fn spectral() -> Template {
    let helper = r#"
        function aceleracionEspectral(T) {
            let C;
            if (T < Tp) {
                C = 2.5;
            } else if (T < TL) {
                C = 2.5 * (Tp / T);
            } else {
                C = 2.5 * (Tp * TL / T ** 2);
            }
            return Z * U * C * S / R;
        }
    "#;
    let formula = r#"
        const aceleraciones = periodos.map(T => aceleracionEspectral(T));
        return { aceleraciones, maxima: Math.max(...aceleraciones) };
    "#;
    Template::new("tpl-espectro", "Espectro de Pseudo-aceleraciones", formula)
        .with_parameter(input("Z"))
        .with_parameter(Parameter::new("U", DataType::Number, ParameterScope::Input).with_default("1.0"))
        .with_parameter(input("S"))
        .with_parameter(input("R").with_range(Some(1.0), None))
        .with_parameter(input("Tp"))
        .with_parameter(input("TL"))
        .with_parameter(Parameter::new("periodos", DataType::Array, ParameterScope::Input).required())
        .with_parameter(
            Parameter::new("aceleracionEspectral", DataType::Number, ParameterScope::Internal).with_formula(helper),
        )
        .with_parameter(output("aceleraciones", DataType::Array))
        .with_parameter(output("maxima", DataType::Number))
}
