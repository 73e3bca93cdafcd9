//! Refinement cycles on generated meshes.

use tc_core::SourceLocation;
use tc_deck::{Card, Deck};
use tc_mesh::{
    FlagPolicy, MeshError, MeshLifecycle, RefineFlag, extrude, flag_cells, generator_for,
};

fn diode_deck() -> Deck {
    let l = SourceLocation::default;
    Deck::new(
        "diode.yaml",
        vec![
            Card::new("MESH", l()).with("type", "s_tri3"),
            Card::new("X.MESH", l()).with("x.max", 2.0).with("n.spaces", 4_i64),
            Card::new("Y.MESH", l()).with("y.max", 1.0).with("n.spaces", 2_i64),
            Card::new("REGION", l())
                .with("label", "pside")
                .with("material", "Si")
                .with("x.max", 1.0),
            Card::new("REGION", l())
                .with("label", "nside")
                .with("material", "Si")
                .with("x.min", 1.0),
            Card::new("FACE", l()).with("label", "anode").with("location", "left"),
            Card::new("FACE", l()).with("label", "cathode").with("location", "right"),
        ],
    )
}

fn area(mesh: &tc_mesh::Mesh) -> f64 {
    (0..mesh.n_cells()).map(|c| mesh.cell_measure(c)).sum()
}

#[test]
fn hierarchical_refine_then_coarsen_restores_cell_count() {
    let mut life = MeshLifecycle::default();
    life.generate(&diode_deck()).unwrap();
    life.broadcast().unwrap();
    let original = life.mesh().unwrap().n_cells();

    // refine the cells next to the junction at x = 1
    let mesh = life.mesh().unwrap();
    let errors: Vec<f64> = (0..mesh.n_cells())
        .map(|c| 1.0 / (0.1 + (mesh.cell_centroid(c)[0] - 1.0).abs()))
        .collect();
    let flags = flag_cells(
        &errors,
        &[FlagPolicy::ErrorFraction {
            refine: 0.2,
            coarsen: 0.0,
        }],
    )
    .unwrap();
    assert!(flags.contains(&RefineFlag::Refine));

    life.gather().unwrap();
    let stats = life.refine_hierarchical(&flags).unwrap();
    assert!(stats.cells_after > original);
    life.broadcast().unwrap();
    let refined = life.mesh().unwrap();
    assert!((area(refined) - 2.0).abs() < 1e-12);
    let labels = refined.boundary_labels().unwrap();
    for expected in ["anode", "cathode", "IF_nside_to_pside"] {
        assert!(labels.contains(&expected.to_string()), "{expected} lost");
    }

    let flags = vec![RefineFlag::Coarsen; refined.n_cells()];
    life.gather().unwrap();
    life.refine_hierarchical(&flags).unwrap();
    life.broadcast().unwrap();
    assert_eq!(life.mesh().unwrap().n_cells(), original);
}

#[test]
fn flagging_without_policy_is_rejected() {
    assert_eq!(
        flag_cells(&[0.1, 0.2], &[]).unwrap_err(),
        MeshError::NoFlagPolicy
    );
}

#[test]
fn three_dimensional_conforming_refinement_needs_a_generator() {
    let mut generator = generator_for("s_quad4").unwrap();
    let planar = generator.generate(&{
        let mut deck = diode_deck();
        deck.cards[0] = Card::new("MESH", SourceLocation::default()).with("type", "s_quad4");
        deck
    });
    let solid = extrude(&planar.unwrap(), &[0.0, 0.5, 1.0]).unwrap();
    assert_eq!(solid.dim(), 3);

    let mut life = MeshLifecycle::default();
    life.replace(solid);
    let flags = vec![RefineFlag::Refine; life_cells(&mut life)];
    assert!(matches!(
        life.refine_conforming(&flags),
        Err(MeshError::UnsupportedOperation { .. })
    ));
}

fn life_cells(life: &mut MeshLifecycle) -> usize {
    life.broadcast().unwrap();
    let n = life.mesh().unwrap().n_cells();
    life.gather().unwrap();
    n
}
