use fieldstore::{ObjectBuilder, Storage, StorageEvent};
use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn primitive_round_trip_through_container() {
    let mut builder = ObjectBuilder::new();
    builder.set_scalar::<i32>("hp").unwrap();
    builder.set_scalar::<f64>("mana").unwrap();
    let mut container = builder.build_container();

    container.write::<i32>("hp", 100, false).unwrap();
    container.write::<f64>("mana", 42.5, false).unwrap();

    assert_eq!(container.read::<i32>("hp").unwrap(), 100);
    assert_eq!(container.read::<f64>("mana").unwrap(), 42.5);
}

#[test]
fn narrow_write_zero_extends_when_read_back_wider() {
    let mut builder = ObjectBuilder::new();
    builder.set_array::<u8>("word", 4).unwrap();
    let mut container = builder.build_container();

    container.write::<i16>("word", -1i16, false).unwrap();
    let widened = container.read::<i32>("word").unwrap();
    assert_eq!(widened, 0x0000_FFFFu32 as i32);
}

#[test]
fn deep_chain_of_auto_created_objects_survives_traversal_and_cloning() {
    let storage = Storage::new();
    let root = storage.root();

    let mut path = String::from("a");
    for i in 1..64 {
        path.push('.');
        path.push('a');
        let _ = i;
    }
    root.write_path::<i32>(&format!("{path}.depth"), 63).unwrap();
    assert_eq!(root.read_path::<i32>(&format!("{path}.depth")).unwrap(), 63);

    let cloned = storage.clone_storage();
    assert_eq!(cloned.root().read_path::<i32>(&format!("{path}.depth")).unwrap(), 63);

    cloned.root().write_path::<i32>(&format!("{path}.depth"), 0).unwrap();
    assert_eq!(root.read_path::<i32>(&format!("{path}.depth")).unwrap(), 63);
}

#[test]
fn path_auto_creates_missing_intermediates_and_reshapes_mismatched_fields() {
    let storage = Storage::new();
    let root = storage.root();

    root.write_path::<i32>("player.stats.hp", 30).unwrap();
    assert_eq!(root.read_path::<i32>("player.stats.hp").unwrap(), 30);

    root.write_path::<i32>("player.stats.mp", 10).unwrap();
    assert_eq!(root.read_path::<i32>("player.stats.hp").unwrap(), 30);
    assert_eq!(root.read_path::<i32>("player.stats.mp").unwrap(), 10);
}

#[test]
fn moving_a_field_preserves_its_value_and_fires_a_single_rename_event() {
    let storage = Storage::new();
    let root = storage.root();
    root.write_path::<i32>("level", 5).unwrap();

    let events: Rc<RefCell<Vec<StorageEvent>>> = Rc::new(RefCell::new(Vec::new()));
    let events_clone = events.clone();
    root.subscribe_container(move |args| events_clone.borrow_mut().push(args.event)).unwrap();

    root.move_field("level", "playerLevel").unwrap();

    assert_eq!(root.read_path::<i32>("playerLevel").unwrap(), 5);
    assert!(root.try_read_path::<i32>("level").is_none());
    assert_eq!(*events.borrow(), vec![StorageEvent::Rename]);
}

#[test]
fn retyping_an_int_array_to_floats_through_the_container_api() {
    use fieldstore::{FieldType, ValueType};

    let mut builder = ObjectBuilder::new();
    builder.set_array_values::<i32>("scores", &[1, 2, 3]).unwrap();
    let mut container = builder.build_container();

    container.retype_field("scores", FieldType::pack(ValueType::Float32, true), true).unwrap();

    let bytes = container.get_field_bytes("scores").unwrap();
    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
        .collect();
    assert_eq!(values, vec![1.0, 2.0, 3.0]);
}
