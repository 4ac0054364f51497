use glam::{DVec3, IVec3};
use hemo_common::{EngineConfig, IBox3, MechanicsVariant, SimParams};
use hemo_engine::cell_type::{CellTypeDescriptor, CellTypes};
use hemo_engine::mesh::ReferenceMesh;
use hemo_engine::mesh_placement::MeshPlacementEngine;
use hemo_engine::placement::{convert_rotation, PlacementFileReader, PlacementRecord, RegionFilter, SpeciesPlacements};
use proptest::prelude::*;

/// dx = 0.5 µm, so one µm spans two lattice units.
fn params() -> SimParams {
    EngineConfig::from_toml_str(
        r#"
        [domain]
        lattice_size = [32, 32, 32]
        dx_m = 5e-7
        dt_s = 1e-7
        particle_envelope = 4
        [timing]
        total_iterations = 1
        output_interval = 1
        checkpoint_interval = 1
        "#,
    )
    .unwrap()
    .get_sim_params()
}

proptest! {
    #[test]
    fn rotation_keeps_the_mesh_centre_on_target(
        rx in -180.0f64..180.0, ry in -180.0f64..180.0, rz in -180.0f64..180.0,
        x in 2.0f64..14.0, y in 2.0f64..14.0, z in 2.0f64..14.0,
    ) {
        // Three collinear vertices: the middle one is the bounding-box centre
        let cell_type = CellTypeDescriptor::new("F", ReferenceMesh::chain(3, 1.0), MechanicsVariant::Standard);
        let engine = MeshPlacementEngine::new(0, &cell_type, &params());
        let record = PlacementRecord {
            cell_id: 7,
            position_um: DVec3::new(x, y, z),
            rotation: convert_rotation(DVec3::new(rx, ry, rz)),
        };
        let vertices: Vec<_> = engine.candidate_vertices(&record).collect();
        prop_assert_eq!(vertices.len(), 3);

        let target = DVec3::new(x, y, z) * 2.0;
        prop_assert!((vertices[1].position - target).length() < 1e-9);
        // Rigid motion: edge lengths scale only by µm to lattice units
        prop_assert!((vertices[0].position.distance(vertices[1].position) - 2.0).abs() < 1e-9);
        prop_assert!((vertices[0].position.distance(vertices[2].position) - 4.0).abs() < 1e-9);
        prop_assert!(vertices.iter().all(|v| v.cell_id == 7));
    }
}

#[test]
fn deny_layer_radius_floors_the_lattice_distance() {
    let p = params();
    let mesh = ReferenceMesh::icosphere(1.0, 0);
    let depth = |d: f64| {
        let t = CellTypeDescriptor::new("RBC", mesh.clone(), MechanicsVariant::Standard).with_minimum_distance_from_solid(d);
        MeshPlacementEngine::new(0, &t, &p).deny_layer()
    };
    assert_eq!(depth(0.0), 0);
    assert_eq!(depth(0.4), 0, "less than one node spacing gives no deny layer");
    assert_eq!(depth(1.2), 2);
    assert_eq!(depth(2.3), 4);
}

#[test]
fn region_filter_discards_records_but_keeps_their_ids() {
    let dir = std::env::temp_dir().join(format!("hemo-placement-filter-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("RBC.pos");
    // In lattice units (×2): 6, 40 and 18; the block covers 0..=15 with a 4-node envelope
    std::fs::write(&path, "3\n3 3 3 0 0 0\n20 3 3 0 0 0\n9 3 3 90 0 0\n").unwrap();

    let types = CellTypes::new(vec![CellTypeDescriptor::new(
        "RBC",
        ReferenceMesh::icosphere(1.0, 0),
        MechanicsVariant::Standard,
    )]);
    let filter = RegionFilter {
        real_domain: IBox3::new(IVec3::ZERO, IVec3::splat(15)),
        envelope: 4,
        um_to_lu: 2.0,
    };
    let set = PlacementFileReader::new(Some(filter)).read_all(&types, &[path]).unwrap();
    assert_eq!(set.declared_cells, 3);
    let SpeciesPlacements::Templated(records) = &set.species[0] else {
        panic!("standard species must produce templated records");
    };
    let ids: Vec<u32> = records.iter().map(|r| r.cell_id).collect();
    assert_eq!(ids, vec![0, 2]);
    assert!((records[1].rotation.x + std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    std::fs::remove_dir_all(&dir).ok();
}
