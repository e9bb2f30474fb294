use kvmodel::{
    record_id, FieldDef, FieldValue, Filters, ModelSchema, ModelStore, Record, StoreConfig,
    StoreError, Strictness, Targets, Values,
};

fn game_store() -> ModelStore {
    let store = ModelStore::in_memory(StoreConfig::new().with_prefix("games")).unwrap();
    store
        .register_model(
            ModelSchema::new("Gamer")
                .field("name", FieldDef::string().not_null())
                .field("rating", FieldDef::number().with_default(0)),
        )
        .unwrap();
    store
        .register_model(
            ModelSchema::new("Account")
                .field("gamer", FieldDef::reference("Gamer"))
                .field("balance", FieldDef::number().with_default(0)),
        )
        .unwrap();
    store
        .register_model(
            ModelSchema::new("TaskChallenge")
                .field("account", FieldDef::reference("Account"))
                .field("status", FieldDef::string().with_default("in_work"))
                .field("attempts", FieldDef::number().with_default(0)),
        )
        .unwrap();
    store
        .register_model(
            ModelSchema::new("Squad")
                .field("title", FieldDef::string().not_null())
                .field("members", FieldDef::many_reference("Gamer")),
        )
        .unwrap();
    store
}

fn create_gamer(store: &ModelStore, name: &str, rating: i64) -> Record {
    store
        .create(
            "Gamer",
            Values::new().set("name", name).set("rating", rating),
        )
        .unwrap()
}

#[test]
fn reference_resolves_through_nested_records() {
    let store = game_store();
    let gamer = create_gamer(&store, "gg_rey", 1200);
    let account = store
        .create(
            "Account",
            Values::new().set("gamer", gamer.clone()).set("balance", 50),
        )
        .unwrap();
    let task = store
        .create("TaskChallenge", Values::new().set("account", account.clone()))
        .unwrap();

    let loaded = &store.get("TaskChallenge", &Filters::new()).unwrap()[0];
    assert_eq!(loaded["id"], task["id"]);
    let loaded_account = match &loaded["account"] {
        FieldValue::Record(inner) => inner,
        other => panic!("expected nested account, got {other:?}"),
    };
    assert_eq!(loaded_account["balance"], FieldValue::Int(50));
    let loaded_gamer = match &loaded_account["gamer"] {
        FieldValue::Record(inner) => inner,
        other => panic!("expected nested gamer, got {other:?}"),
    };
    assert_eq!(loaded_gamer["name"], FieldValue::Str("gg_rey".into()));
}

#[test]
fn reference_accepts_record_or_raw_id() {
    let store = game_store();
    let gamer = create_gamer(&store, "gg_kai", 900);
    let by_record = store
        .create("Account", Values::new().set("gamer", gamer.clone()))
        .unwrap();
    let by_id = store
        .create("Account", Values::new().set("gamer", record_id(&gamer).unwrap()))
        .unwrap();

    for account in [&by_record, &by_id] {
        let nested = match &account["gamer"] {
            FieldValue::Record(inner) => inner,
            other => panic!("expected nested gamer, got {other:?}"),
        };
        assert_eq!(record_id(nested), record_id(&gamer));
    }
}

#[test]
fn filter_by_reference_record_and_by_id_agree() {
    let store = game_store();
    let rey = create_gamer(&store, "gg_rey", 1200);
    let kai = create_gamer(&store, "gg_kai", 900);
    store.create("Account", Values::new().set("gamer", rey.clone())).unwrap();
    store.create("Account", Values::new().set("gamer", kai)).unwrap();

    let by_record = store
        .get("Account", &Filters::new().filter("gamer", rey.clone()))
        .unwrap();
    let by_id = store
        .get("Account", &Filters::new().filter("gamer", record_id(&rey).unwrap()))
        .unwrap();
    assert_eq!(by_record.len(), 1);
    assert_eq!(by_record, by_id);
}

#[test]
fn filter_reference_with_in_operator() {
    let store = game_store();
    let ids: Vec<i64> = (0..3)
        .map(|n| {
            let gamer = create_gamer(&store, &format!("gamer_{n}"), n);
            store
                .create("Account", Values::new().set("gamer", gamer.clone()))
                .unwrap();
            record_id(&gamer).unwrap()
        })
        .collect();

    let found = store
        .get(
            "Account",
            &Filters::new().filter("gamer__in", vec![ids[0], ids[2]]),
        )
        .unwrap();
    assert_eq!(found.len(), 2);
}

#[test]
fn multi_hop_path_reaches_grandparent_fields() {
    let store = game_store();
    for (name, rating, status) in [
        ("gg_rey", 1200, "in_work"),
        ("gg_kai", 900, "completed"),
        ("visitor", 1500, "in_work"),
    ] {
        let gamer = create_gamer(&store, name, rating);
        let account = store
            .create("Account", Values::new().set("gamer", gamer))
            .unwrap();
        store
            .create(
                "TaskChallenge",
                Values::new().set("account", account).set("status", status),
            )
            .unwrap();
    }

    let prefixed = store
        .get(
            "TaskChallenge",
            &Filters::new().filter("account__gamer__name__startswith", "gg_"),
        )
        .unwrap();
    assert_eq!(prefixed.len(), 2);

    let strong_in_work = store
        .get(
            "TaskChallenge",
            &Filters::new()
                .filter("account__gamer__rating__gte", 1000)
                .filter("status", "in_work"),
        )
        .unwrap();
    assert_eq!(strong_in_work.len(), 2);

    let terminal_id_hop = store
        .get("TaskChallenge", &Filters::new().filter("account__id", 1_i64))
        .unwrap();
    assert_eq!(terminal_id_hop.len(), 1);

    let any_account = store
        .get("TaskChallenge", &Filters::new().filter("account__id__gt", 0))
        .unwrap();
    assert_eq!(any_account.len(), 3);
}

#[test]
fn many_reference_membership_and_set_equality() {
    let store = game_store();
    let rey = record_id(&create_gamer(&store, "gg_rey", 1200)).unwrap();
    let kai = record_id(&create_gamer(&store, "gg_kai", 900)).unwrap();
    let zed = record_id(&create_gamer(&store, "zed", 700)).unwrap();

    store
        .create(
            "Squad",
            Values::new().set("title", "alpha").set("members", vec![rey, kai]),
        )
        .unwrap();
    store
        .create(
            "Squad",
            Values::new().set("title", "beta").set("members", vec![kai, zed]),
        )
        .unwrap();

    let with_kai = store
        .get("Squad", &Filters::new().filter("members", kai))
        .unwrap();
    assert_eq!(with_kai.len(), 2);

    // A list operand means the whole membership set, order aside.
    let exact_alpha = store
        .get("Squad", &Filters::new().filter("members", vec![kai, rey]))
        .unwrap();
    assert_eq!(exact_alpha.len(), 1);
    assert_eq!(exact_alpha[0]["title"], FieldValue::Str("alpha".into()));

    let touching = store
        .get("Squad", &Filters::new().filter("members__in", vec![rey, zed]))
        .unwrap();
    assert_eq!(touching.len(), 2);
}

#[test]
fn many_reference_resolves_in_stored_order() {
    let store = game_store();
    let rey = record_id(&create_gamer(&store, "gg_rey", 1200)).unwrap();
    let kai = record_id(&create_gamer(&store, "gg_kai", 900)).unwrap();

    let squad = store
        .create(
            "Squad",
            Values::new()
                .set("title", "alpha")
                .set("members", vec![kai, rey, kai]),
        )
        .unwrap();
    let members = match &squad["members"] {
        FieldValue::Records(list) => list,
        other => panic!("expected member records, got {other:?}"),
    };
    // Duplicates collapse, first mention wins.
    let names: Vec<&FieldValue> = members.iter().map(|m| &m["name"]).collect();
    assert_eq!(
        names,
        vec![
            &FieldValue::Str("gg_kai".into()),
            &FieldValue::Str("gg_rey".into())
        ]
    );
}

#[test]
fn dangling_reference_degrades_to_id_stub() {
    let store = game_store();
    let gamer = create_gamer(&store, "gg_rey", 1200);
    let gamer_id = record_id(&gamer).unwrap();
    store.create("Account", Values::new().set("gamer", gamer)).unwrap();

    store.delete("Gamer", gamer_id).unwrap();

    let account = &store.get("Account", &Filters::new()).unwrap()[0];
    let stub = match &account["gamer"] {
        FieldValue::Record(inner) => inner,
        other => panic!("expected stub record, got {other:?}"),
    };
    assert_eq!(stub.len(), 1);
    assert_eq!(stub["id"], FieldValue::Int(gamer_id));
}

#[test]
fn nullable_reference_defaults_to_null_and_filters_isnull() {
    let store = game_store();
    let gamer = create_gamer(&store, "gg_rey", 1200);
    store.create("Account", Values::new().set("gamer", gamer)).unwrap();
    let orphan = store.create("Account", Values::new()).unwrap();
    assert_eq!(orphan["gamer"], FieldValue::Null);

    let orphans = store
        .get("Account", &Filters::new().filter("gamer__isnull", true))
        .unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0]["id"], orphan["id"]);

    let linked = store
        .get("Account", &Filters::new().filter("gamer__isnull", false))
        .unwrap();
    assert_eq!(linked.len(), 1);
}

#[test]
fn strict_store_rejects_scalar_traversal() {
    let store = ModelStore::in_memory(
        StoreConfig::new()
            .with_prefix("games")
            .with_strictness(Strictness::Strict),
    )
    .unwrap();
    store
        .register_model(
            ModelSchema::new("Gamer").field("name", FieldDef::string().not_null()),
        )
        .unwrap();
    create_gamer_into(&store);

    let err = store
        .get("Gamer", &Filters::new().filter("name__rating__gte", 1))
        .unwrap_err();
    assert!(matches!(err, StoreError::RelationResolution(_)));
}

fn create_gamer_into(store: &ModelStore) {
    store
        .create("Gamer", Values::new().set("name", "gg_rey"))
        .unwrap();
}

#[test]
fn updating_reference_moves_the_link() {
    let store = game_store();
    let rey = create_gamer(&store, "gg_rey", 1200);
    let kai = create_gamer(&store, "gg_kai", 900);
    let account = store
        .create("Account", Values::new().set("gamer", rey))
        .unwrap();

    store
        .update(
            "Account",
            Targets::record(&account).unwrap(),
            Values::new().set("gamer", kai.clone()),
        )
        .unwrap();

    let moved = store
        .get("Account", &Filters::new().filter("gamer", kai))
        .unwrap();
    assert_eq!(moved.len(), 1);
    assert_eq!(moved[0]["id"], account["id"]);
}
