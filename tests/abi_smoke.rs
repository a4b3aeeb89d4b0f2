// C ABI smoke test: drive the `bsl_*` functions the way a C caller would.
use std::ffi::{CStr, CString, c_void};
use std::ptr;

use bitsel::abi::*;

fn c(text: &str) -> CString {
    CString::new(text).expect("cstring")
}

#[test]
fn write_index_query_and_free() {
    let temp = tempfile::tempdir().expect("tempdir");
    let rc = temp.path().join("empty.rc");
    std::fs::write(&rc, "# nothing configured\nverboseness = 0\n").expect("rc");
    let dir = c(temp.path().join("abi").to_str().unwrap());

    let mut session: *mut bsl_session = ptr::null_mut();
    let mut err: *mut bsl_error = ptr::null_mut();
    let conf = c(rc.to_str().unwrap());
    assert_eq!(bsl_init(conf.as_ptr(), &mut session, &mut err), 0);
    assert!(!session.is_null());

    let ints: Vec<i32> = (0..20).collect();
    let doubles: Vec<f64> = (0..20).map(|v| v as f64 * 1.5).collect();
    let rc = bsl_add_values(
        session,
        c("n").as_ptr(),
        c("int").as_ptr(),
        ints.as_ptr() as *const c_void,
        ints.len() as u32,
        0,
        &mut err,
    );
    assert_eq!(rc, 0);
    let rc = bsl_add_values(
        session,
        c("x").as_ptr(),
        c("double").as_ptr(),
        doubles.as_ptr() as *const c_void,
        doubles.len() as u32,
        0,
        &mut err,
    );
    assert_eq!(rc, 0);
    assert_eq!(bsl_flush_buffer(session, dir.as_ptr(), &mut err), 20);
    assert_eq!(bsl_rows_in_partition(session, dir.as_ptr(), &mut err), 20);
    assert_eq!(bsl_columns_in_partition(session, dir.as_ptr(), &mut err), 2);
    assert_eq!(
        bsl_build_indexes(session, dir.as_ptr(), ptr::null(), &mut err),
        2
    );

    let query = bsl_build_query(
        session,
        c("n, x").as_ptr(),
        dir.as_ptr(),
        c("n >= 17").as_ptr(),
        &mut err,
    );
    assert!(!query.is_null());
    assert_eq!(bsl_get_result_rows(query, &mut err), 3);
    assert_eq!(bsl_get_result_columns(query, &mut err), 2);
    let where_clause = unsafe { CStr::from_ptr(bsl_get_where_clause(query)) };
    assert_eq!(where_clause.to_str().unwrap(), "n >= 17");

    let mut len = 0u64;
    let values = bsl_get_qualified_ints(query, c("n").as_ptr(), &mut len, &mut err);
    assert!(!values.is_null());
    let values = unsafe { std::slice::from_raw_parts(values, len as usize) };
    assert_eq!(values, &[17, 18, 19]);

    let values = bsl_get_qualified_doubles(query, c("x").as_ptr(), &mut len, &mut err);
    let values = unsafe { std::slice::from_raw_parts(values, len as usize) };
    assert_eq!(values, &[25.5, 27.0, 28.5]);

    let rset = bsl_build_result_set(query, &mut err);
    assert!(!rset.is_null());
    let mut rows = 0;
    while bsl_result_set_next(rset, &mut err) == 0 {
        let mut n = 0i32;
        let mut x = 0f64;
        assert_eq!(bsl_result_set_get_int(rset, 0, &mut n, &mut err), 0);
        assert_eq!(bsl_result_set_get_double(rset, 1, &mut x, &mut err), 0);
        assert_eq!(x, n as f64 * 1.5);
        let text = unsafe { CStr::from_ptr(bsl_result_set_get_string(rset, 0, &mut err)) };
        assert_eq!(text.to_str().unwrap(), n.to_string());
        rows += 1;
    }
    assert_eq!(rows, 3);
    bsl_destroy_result_set(rset);
    bsl_destroy_query(query);

    assert_eq!(bsl_purge_indexes(session, dir.as_ptr(), &mut err), 0);
    assert!(err.is_null());
    bsl_cleanup(session);
}

#[test]
fn failures_fill_the_error_struct() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = c(temp.path().join("missing").to_str().unwrap());
    let mut session: *mut bsl_session = ptr::null_mut();
    let mut err: *mut bsl_error = ptr::null_mut();
    let rc = temp.path().join("empty.rc");
    std::fs::write(&rc, "index = none\n").expect("rc");
    let conf = c(rc.to_str().unwrap());
    assert_eq!(bsl_init(conf.as_ptr(), &mut session, &mut err), 0);

    assert_eq!(bsl_rows_in_partition(session, dir.as_ptr(), &mut err), -1);
    assert!(!err.is_null());
    assert_eq!(bsl_error_kind(err), 3);
    let message = unsafe { CStr::from_ptr(bsl_error_message(err)) };
    assert!(message.to_str().unwrap().starts_with("NotFound"));
    bsl_error_free(err);

    let mut err: *mut bsl_error = ptr::null_mut();
    let query = bsl_build_query(session, ptr::null(), dir.as_ptr(), c("a < 1").as_ptr(), &mut err);
    assert!(query.is_null());
    assert!(!err.is_null());
    bsl_error_free(err);

    let mut err: *mut bsl_error = ptr::null_mut();
    assert_eq!(bsl_get_result_rows(ptr::null_mut(), &mut err), -1);
    assert_eq!(bsl_error_kind(err), 2);
    bsl_error_free(err);

    bsl_cleanup(session);
}

fn add<T>(session: *mut bsl_session, name: &str, coltype: &str, values: &[T]) {
    let mut err: *mut bsl_error = ptr::null_mut();
    let rc = bsl_add_values(
        session,
        c(name).as_ptr(),
        c(coltype).as_ptr(),
        values.as_ptr() as *const c_void,
        values.len() as u32,
        0,
        &mut err,
    );
    assert_eq!(rc, 0, "add_values {name}");
}

fn slice<'a, T>(values: *const T, len: u64) -> &'a [T] {
    assert!(!values.is_null());
    unsafe { std::slice::from_raw_parts(values, len as usize) }
}

#[test]
fn every_element_type_is_retrievable() {
    let temp = tempfile::tempdir().expect("tempdir");
    let rc = temp.path().join("empty.rc");
    std::fs::write(&rc, "index = none\n").expect("rc");
    let dir = c(temp.path().join("types").to_str().unwrap());

    let mut session: *mut bsl_session = ptr::null_mut();
    let mut err: *mut bsl_error = ptr::null_mut();
    assert_eq!(bsl_init(c(rc.to_str().unwrap()).as_ptr(), &mut session, &mut err), 0);

    add(session, "b", "byte", &[-3i8, -2, -1, 0]);
    add(session, "ub", "ubyte", &[250u8, 251, 252, 253]);
    add(session, "s", "short", &[-300i16, -200, -100, 0]);
    add(session, "us", "ushort", &[60000u16, 60001, 60002, 60003]);
    add(session, "ui", "uint", &[4_000_000_000u32, 1, 2, 3]);
    add(session, "ul", "ulong", &[u64::MAX - 3, 7, 8, 9]);
    add(session, "f", "float", &[0.25f32, 0.5, 0.75, 1.0]);
    assert_eq!(bsl_flush_buffer(session, dir.as_ptr(), &mut err), 4);

    let query = bsl_build_query(
        session,
        c("ui, f").as_ptr(),
        dir.as_ptr(),
        c("f >= 0.5").as_ptr(),
        &mut err,
    );
    assert!(!query.is_null());

    let mut len = 0u64;
    let bytes = bsl_get_qualified_bytes(query, c("b").as_ptr(), &mut len, &mut err);
    assert_eq!(slice(bytes, len), &[-2, -1, 0]);
    let ubytes = bsl_get_qualified_ubytes(query, c("ub").as_ptr(), &mut len, &mut err);
    assert_eq!(slice(ubytes, len), &[251, 252, 253]);
    let shorts = bsl_get_qualified_shorts(query, c("s").as_ptr(), &mut len, &mut err);
    assert_eq!(slice(shorts, len), &[-200, -100, 0]);
    let ushorts = bsl_get_qualified_ushorts(query, c("us").as_ptr(), &mut len, &mut err);
    assert_eq!(slice(ushorts, len), &[60001, 60002, 60003]);
    let uints = bsl_get_qualified_uints(query, c("ui").as_ptr(), &mut len, &mut err);
    assert_eq!(slice(uints, len), &[1, 2, 3]);
    let ulongs = bsl_get_qualified_ulongs(query, c("ul").as_ptr(), &mut len, &mut err);
    assert_eq!(slice(ulongs, len), &[7, 8, 9]);
    let floats = bsl_get_qualified_floats(query, c("f").as_ptr(), &mut len, &mut err);
    assert_eq!(slice(floats, len), &[0.5, 0.75, 1.0]);
    // Earlier arrays stay valid while the query lives.
    assert_eq!(slice(bytes, 3), &[-2, -1, 0]);
    assert!(err.is_null());

    let missing = bsl_get_qualified_uints(query, c("s").as_ptr(), &mut len, &mut err);
    assert!(missing.is_null());
    assert_eq!(bsl_error_kind(err), 4);
    bsl_error_free(err);
    let mut err: *mut bsl_error = ptr::null_mut();

    let rset = bsl_build_result_set(query, &mut err);
    assert_eq!(bsl_result_set_next(rset, &mut err), 0);
    let mut unsigned = 0u32;
    let mut float = 0f32;
    assert_eq!(bsl_result_set_get_unsigned(rset, 0, &mut unsigned, &mut err), 0);
    assert_eq!(bsl_result_set_get_float(rset, 1, &mut float, &mut err), 0);
    assert_eq!((unsigned, float), (1, 0.5));
    assert_eq!(bsl_result_set_get_unsigned(rset, 1, &mut unsigned, &mut err), -1);
    bsl_error_free(err);
    bsl_destroy_result_set(rset);
    bsl_destroy_query(query);
    bsl_cleanup(session);
}

#[test]
fn verbose_level_and_logfile_use_out_params() {
    let temp = tempfile::tempdir().expect("tempdir");
    let rc = temp.path().join("empty.rc");
    std::fs::write(&rc, "verboseness = 0\n").expect("rc");
    let log = temp.path().join("abi.log");

    let mut session: *mut bsl_session = ptr::null_mut();
    let mut err: *mut bsl_error = ptr::null_mut();
    assert_eq!(bsl_init(c(rc.to_str().unwrap()).as_ptr(), &mut session, &mut err), 0);

    let mut previous = 99;
    assert_eq!(bsl_set_verbose_level(session, -1, &mut previous, &mut err), 0);
    assert_eq!(previous, 0);
    let mut level = 0;
    assert_eq!(bsl_get_verbose_level(session, &mut level, &mut err), 0);
    assert_eq!(level, -1);
    assert_eq!(bsl_set_verbose_level(session, 0, ptr::null_mut(), &mut err), 0);

    let current = unsafe { CStr::from_ptr(bsl_get_logfile(session, &mut err)) };
    assert_eq!(current.to_str().unwrap(), "");
    assert_eq!(
        bsl_set_logfile(session, c(log.to_str().unwrap()).as_ptr(), &mut err),
        0
    );
    let current = unsafe { CStr::from_ptr(bsl_get_logfile(session, &mut err)) };
    assert_eq!(current.to_str().unwrap(), log.to_str().unwrap());
    assert_eq!(bsl_set_logfile(session, ptr::null(), &mut err), 0);
    assert!(err.is_null());

    let mut level = 0;
    assert_eq!(bsl_get_verbose_level(ptr::null_mut(), &mut level, &mut err), -1);
    assert_eq!(bsl_error_kind(err), 2);
    bsl_error_free(err);
    bsl_cleanup(session);
}
