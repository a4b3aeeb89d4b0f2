//! Purpose: C ABI bridge over the session API (libbitsel).
//! Exports: `bsl_*` session, write, index, query, and result-set functions.
//! Role: Stable ABI surface for callers in other languages.
//! Invariants: Opaque handles; every handle has an explicit destroy/free function.
//! Invariants: Integer results are negative on failure; error kinds map 1:1 with core error kinds.
//! Notes: Arrays and strings returned from a query or result set stay owned by that handle.
#![allow(clippy::result_large_err)]
#![allow(clippy::missing_safety_doc)]

use std::any::Any;
use std::ffi::{CStr, CString, c_void};
use std::os::raw::c_char;
use std::path::Path;
use std::ptr;

use crate::api::{
    ColumnType, ColumnValues, Qualified, QueryHandle, ResultSet, Session, to_exit_code,
};
use crate::core::error::{Error, ErrorKind};

#[repr(C)]
pub struct bsl_session {
    session: Session,
    logfile: CString,
}

#[repr(C)]
pub struct bsl_query {
    query: QueryHandle,
    select: CString,
    from: CString,
    where_clause: CString,
    // Every array handed out stays alive until the query is destroyed.
    retrieved: Vec<Box<dyn Any>>,
}

#[repr(C)]
pub struct bsl_result_set {
    rows: ResultSet,
    text: CString,
}

#[repr(C)]
pub struct bsl_error {
    kind: i32,
    message: *mut c_char,
    path: *mut c_char,
    column: *mut c_char,
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_init(
    conffile: *const c_char,
    out_session: *mut *mut bsl_session,
    out_err: *mut *mut bsl_error,
) -> i32 {
    if out_session.is_null() {
        return fail(
            out_err,
            Error::new(ErrorKind::Usage).with_message("out_session is null"),
        );
    }
    let conffile = match read_opt_str(conffile, "conffile", out_err) {
        Ok(conffile) => conffile,
        Err(code) => return code,
    };
    let session = match Session::init(conffile.map(Path::new)) {
        Ok(session) => session,
        Err(err) => return fail(out_err, err),
    };
    let handle = Box::new(bsl_session {
        session,
        logfile: CString::default(),
    });
    unsafe {
        *out_session = Box::into_raw(handle);
    }
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_cleanup(session: *mut bsl_session) {
    if session.is_null() {
        return;
    }
    let handle = unsafe { Box::from_raw(session) };
    handle.session.cleanup();
}

/// Stores the previous level in `*out_previous` when it is not NULL.
#[unsafe(no_mangle)]
pub extern "C" fn bsl_set_verbose_level(
    session: *mut bsl_session,
    level: i32,
    out_previous: *mut i32,
    out_err: *mut *mut bsl_error,
) -> i32 {
    let handle = match borrow_session(session, out_err) {
        Ok(handle) => handle,
        Err(code) => return code,
    };
    let previous = handle.session.set_verbose_level(level);
    if !out_previous.is_null() {
        unsafe {
            *out_previous = previous;
        }
    }
    0
}

/// Levels may be negative, so the level is written to `*out_level`.
#[unsafe(no_mangle)]
pub extern "C" fn bsl_get_verbose_level(
    session: *mut bsl_session,
    out_level: *mut i32,
    out_err: *mut *mut bsl_error,
) -> i32 {
    match borrow_session(session, out_err) {
        Ok(handle) => write_out(Ok(handle.session.verbose_level()), out_level, out_err),
        Err(code) => code,
    }
}

/// Path diagnostics are written to; an empty string means stderr.
/// Valid until the next call on this session.
#[unsafe(no_mangle)]
pub extern "C" fn bsl_get_logfile(
    session: *mut bsl_session,
    out_err: *mut *mut bsl_error,
) -> *const c_char {
    let handle = match borrow_session(session, out_err) {
        Ok(handle) => handle,
        Err(_) => return ptr::null(),
    };
    let path = handle
        .session
        .log_file()
        .map(|path| path.to_string_lossy().into_owned())
        .unwrap_or_default();
    handle.logfile = owned_c_string(&path);
    handle.logfile.as_ptr()
}

/// A NULL `path` sends diagnostics back to stderr.
#[unsafe(no_mangle)]
pub extern "C" fn bsl_set_logfile(
    session: *mut bsl_session,
    path: *const c_char,
    out_err: *mut *mut bsl_error,
) -> i32 {
    let handle = match borrow_session(session, out_err) {
        Ok(handle) => handle,
        Err(code) => return code,
    };
    let path = match read_opt_str(path, "path", out_err) {
        Ok(path) => path,
        Err(code) => return code,
    };
    status(handle.session.set_log_file(path.map(Path::new)), out_err)
}

/// Buffers `nelem` values of `coltype` for column `colname` starting at row `start`.
#[unsafe(no_mangle)]
pub extern "C" fn bsl_add_values(
    session: *mut bsl_session,
    colname: *const c_char,
    coltype: *const c_char,
    values: *const c_void,
    nelem: u32,
    start: u32,
    out_err: *mut *mut bsl_error,
) -> i32 {
    let handle = match borrow_session(session, out_err) {
        Ok(handle) => handle,
        Err(code) => return code,
    };
    let colname = match read_str(colname, "colname", out_err) {
        Ok(colname) => colname,
        Err(code) => return code,
    };
    let coltype = match read_str(coltype, "coltype", out_err) {
        Ok(coltype) => coltype,
        Err(code) => return code,
    };
    let column_type = match ColumnType::parse(coltype) {
        Ok(column_type) => column_type,
        Err(err) => return fail(out_err, err),
    };
    if values.is_null() && nelem > 0 {
        return fail(
            out_err,
            Error::new(ErrorKind::Usage).with_message("values is null"),
        );
    }
    let values = unsafe { copy_values(column_type, values, nelem as usize) };
    status(
        handle.session.add_values(colname, values, start as usize),
        out_err,
    )
}

/// Returns the number of rows written.
#[unsafe(no_mangle)]
pub extern "C" fn bsl_flush_buffer(
    session: *mut bsl_session,
    dir: *const c_char,
    out_err: *mut *mut bsl_error,
) -> i64 {
    let (handle, dir) = match session_and_dir(session, dir, out_err) {
        Ok(pair) => pair,
        Err(code) => return code as i64,
    };
    match handle.session.flush_buffer(dir) {
        Ok(rows) => rows as i64,
        Err(err) => fail(out_err, err) as i64,
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_rows_in_partition(
    session: *mut bsl_session,
    dir: *const c_char,
    out_err: *mut *mut bsl_error,
) -> i64 {
    let (handle, dir) = match session_and_dir(session, dir, out_err) {
        Ok(pair) => pair,
        Err(code) => return code as i64,
    };
    match handle.session.rows_in_partition(dir) {
        Ok(rows) => rows as i64,
        Err(err) => fail(out_err, err) as i64,
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_columns_in_partition(
    session: *mut bsl_session,
    dir: *const c_char,
    out_err: *mut *mut bsl_error,
) -> i32 {
    let (handle, dir) = match session_and_dir(session, dir, out_err) {
        Ok(pair) => pair,
        Err(code) => return code,
    };
    match handle.session.columns_in_partition(dir) {
        Ok(columns) => columns as i32,
        Err(err) => fail(out_err, err),
    }
}

/// Returns the number of indexes written. A NULL `spec` uses the configured default.
#[unsafe(no_mangle)]
pub extern "C" fn bsl_build_indexes(
    session: *mut bsl_session,
    dir: *const c_char,
    spec: *const c_char,
    out_err: *mut *mut bsl_error,
) -> i32 {
    let (handle, dir) = match session_and_dir(session, dir, out_err) {
        Ok(pair) => pair,
        Err(code) => return code,
    };
    let spec = match read_opt_str(spec, "spec", out_err) {
        Ok(spec) => spec,
        Err(code) => return code,
    };
    match handle.session.build_indexes(dir, spec) {
        Ok(built) => built as i32,
        Err(err) => fail(out_err, err),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_purge_indexes(
    session: *mut bsl_session,
    dir: *const c_char,
    out_err: *mut *mut bsl_error,
) -> i32 {
    let (handle, dir) = match session_and_dir(session, dir, out_err) {
        Ok(pair) => pair,
        Err(code) => return code,
    };
    status(handle.session.purge_indexes(dir), out_err)
}

/// Returns 1 when an index file was written, 0 when the index spec resolves to none.
#[unsafe(no_mangle)]
pub extern "C" fn bsl_build_index(
    session: *mut bsl_session,
    dir: *const c_char,
    colname: *const c_char,
    spec: *const c_char,
    out_err: *mut *mut bsl_error,
) -> i32 {
    let (handle, dir) = match session_and_dir(session, dir, out_err) {
        Ok(pair) => pair,
        Err(code) => return code,
    };
    let colname = match read_str(colname, "colname", out_err) {
        Ok(colname) => colname,
        Err(code) => return code,
    };
    let spec = match read_opt_str(spec, "spec", out_err) {
        Ok(spec) => spec,
        Err(code) => return code,
    };
    match handle.session.build_index(dir, colname, spec) {
        Ok(built) => i32::from(built),
        Err(err) => fail(out_err, err),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_purge_index(
    session: *mut bsl_session,
    dir: *const c_char,
    colname: *const c_char,
    out_err: *mut *mut bsl_error,
) -> i32 {
    let (handle, dir) = match session_and_dir(session, dir, out_err) {
        Ok(pair) => pair,
        Err(code) => return code,
    };
    let colname = match read_str(colname, "colname", out_err) {
        Ok(colname) => colname,
        Err(code) => return code,
    };
    status(handle.session.purge_index(dir, colname), out_err)
}

/// Evaluates `where_clause` over the partition in `dir`. Returns NULL on failure.
#[unsafe(no_mangle)]
pub extern "C" fn bsl_build_query(
    session: *mut bsl_session,
    select: *const c_char,
    dir: *const c_char,
    where_clause: *const c_char,
    out_err: *mut *mut bsl_error,
) -> *mut bsl_query {
    let (handle, dir) = match session_and_dir(session, dir, out_err) {
        Ok(pair) => pair,
        Err(_) => return ptr::null_mut(),
    };
    let select = match read_opt_str(select, "select", out_err) {
        Ok(select) => select,
        Err(_) => return ptr::null_mut(),
    };
    let where_clause = match read_opt_str(where_clause, "where_clause", out_err) {
        Ok(where_clause) => where_clause,
        Err(_) => return ptr::null_mut(),
    };
    let query = match handle.session.build_query(select, dir, where_clause) {
        Ok(query) => query,
        Err(err) => {
            fail(out_err, err);
            return ptr::null_mut();
        }
    };
    let handle = Box::new(bsl_query {
        select: owned_c_string(query.select_clause()),
        from: owned_c_string(&query.from_clause().to_string_lossy()),
        where_clause: owned_c_string(query.where_clause()),
        query,
        retrieved: Vec::new(),
    });
    Box::into_raw(handle)
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_destroy_query(query: *mut bsl_query) {
    if query.is_null() {
        return;
    }
    let handle = unsafe { Box::from_raw(query) };
    handle.query.destroy();
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_get_result_rows(query: *mut bsl_query, out_err: *mut *mut bsl_error) -> i64 {
    match borrow_query(query, out_err) {
        Ok(handle) => handle.query.result_rows() as i64,
        Err(code) => code as i64,
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_get_result_columns(
    query: *mut bsl_query,
    out_err: *mut *mut bsl_error,
) -> i32 {
    match borrow_query(query, out_err) {
        Ok(handle) => handle.query.result_columns() as i32,
        Err(code) => code,
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_get_select_clause(query: *mut bsl_query) -> *const c_char {
    clause(query, |handle| &handle.select)
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_get_from_clause(query: *mut bsl_query) -> *const c_char {
    clause(query, |handle| &handle.from)
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_get_where_clause(query: *mut bsl_query) -> *const c_char {
    clause(query, |handle| &handle.where_clause)
}

/// Values of `colname` at the hit rows, converted to the element type of the
/// function; `*out_len` gets the count. The array is owned by the query and
/// stays valid until `bsl_destroy_query`. Returns NULL on failure.
#[unsafe(no_mangle)]
pub extern "C" fn bsl_get_qualified_bytes(
    query: *mut bsl_query,
    colname: *const c_char,
    out_len: *mut u64,
    out_err: *mut *mut bsl_error,
) -> *const i8 {
    qualified(query, colname, out_len, out_err)
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_get_qualified_ubytes(
    query: *mut bsl_query,
    colname: *const c_char,
    out_len: *mut u64,
    out_err: *mut *mut bsl_error,
) -> *const u8 {
    qualified(query, colname, out_len, out_err)
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_get_qualified_shorts(
    query: *mut bsl_query,
    colname: *const c_char,
    out_len: *mut u64,
    out_err: *mut *mut bsl_error,
) -> *const i16 {
    qualified(query, colname, out_len, out_err)
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_get_qualified_ushorts(
    query: *mut bsl_query,
    colname: *const c_char,
    out_len: *mut u64,
    out_err: *mut *mut bsl_error,
) -> *const u16 {
    qualified(query, colname, out_len, out_err)
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_get_qualified_ints(
    query: *mut bsl_query,
    colname: *const c_char,
    out_len: *mut u64,
    out_err: *mut *mut bsl_error,
) -> *const i32 {
    qualified(query, colname, out_len, out_err)
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_get_qualified_uints(
    query: *mut bsl_query,
    colname: *const c_char,
    out_len: *mut u64,
    out_err: *mut *mut bsl_error,
) -> *const u32 {
    qualified(query, colname, out_len, out_err)
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_get_qualified_longs(
    query: *mut bsl_query,
    colname: *const c_char,
    out_len: *mut u64,
    out_err: *mut *mut bsl_error,
) -> *const i64 {
    qualified(query, colname, out_len, out_err)
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_get_qualified_ulongs(
    query: *mut bsl_query,
    colname: *const c_char,
    out_len: *mut u64,
    out_err: *mut *mut bsl_error,
) -> *const u64 {
    qualified(query, colname, out_len, out_err)
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_get_qualified_floats(
    query: *mut bsl_query,
    colname: *const c_char,
    out_len: *mut u64,
    out_err: *mut *mut bsl_error,
) -> *const f32 {
    qualified(query, colname, out_len, out_err)
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_get_qualified_doubles(
    query: *mut bsl_query,
    colname: *const c_char,
    out_len: *mut u64,
    out_err: *mut *mut bsl_error,
) -> *const f64 {
    qualified(query, colname, out_len, out_err)
}

/// Cursor over the selected columns of the hit rows. Returns NULL on failure.
#[unsafe(no_mangle)]
pub extern "C" fn bsl_build_result_set(
    query: *mut bsl_query,
    out_err: *mut *mut bsl_error,
) -> *mut bsl_result_set {
    let handle = match borrow_query(query, out_err) {
        Ok(handle) => handle,
        Err(_) => return ptr::null_mut(),
    };
    match handle.query.result_set() {
        Ok(rows) => Box::into_raw(Box::new(bsl_result_set {
            rows,
            text: CString::default(),
        })),
        Err(err) => {
            fail(out_err, err);
            ptr::null_mut()
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_destroy_result_set(rset: *mut bsl_result_set) {
    if rset.is_null() {
        return;
    }
    unsafe {
        drop(Box::from_raw(rset));
    }
}

/// 0 when positioned on a row, -1 when exhausted, -2 on error.
#[unsafe(no_mangle)]
pub extern "C" fn bsl_result_set_next(
    rset: *mut bsl_result_set,
    out_err: *mut *mut bsl_error,
) -> i32 {
    let handle = match borrow_result_set(rset, out_err) {
        Ok(handle) => handle,
        Err(_) => return -2,
    };
    if handle.rows.next() { 0 } else { -1 }
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_result_set_get_int(
    rset: *mut bsl_result_set,
    position: u32,
    out_value: *mut i32,
    out_err: *mut *mut bsl_error,
) -> i32 {
    let handle = match borrow_result_set(rset, out_err) {
        Ok(handle) => handle,
        Err(code) => return code,
    };
    write_out(handle.rows.get_i32(position as usize), out_value, out_err)
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_result_set_get_double(
    rset: *mut bsl_result_set,
    position: u32,
    out_value: *mut f64,
    out_err: *mut *mut bsl_error,
) -> i32 {
    let handle = match borrow_result_set(rset, out_err) {
        Ok(handle) => handle,
        Err(code) => return code,
    };
    write_out(handle.rows.get_f64(position as usize), out_value, out_err)
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_result_set_get_unsigned(
    rset: *mut bsl_result_set,
    position: u32,
    out_value: *mut u32,
    out_err: *mut *mut bsl_error,
) -> i32 {
    let handle = match borrow_result_set(rset, out_err) {
        Ok(handle) => handle,
        Err(code) => return code,
    };
    write_out(handle.rows.get_u32(position as usize), out_value, out_err)
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_result_set_get_float(
    rset: *mut bsl_result_set,
    position: u32,
    out_value: *mut f32,
    out_err: *mut *mut bsl_error,
) -> i32 {
    let handle = match borrow_result_set(rset, out_err) {
        Ok(handle) => handle,
        Err(code) => return code,
    };
    write_out(handle.rows.get_f32(position as usize), out_value, out_err)
}

/// Text of the current value; valid until the next call on this result set.
#[unsafe(no_mangle)]
pub extern "C" fn bsl_result_set_get_string(
    rset: *mut bsl_result_set,
    position: u32,
    out_err: *mut *mut bsl_error,
) -> *const c_char {
    let handle = match borrow_result_set(rset, out_err) {
        Ok(handle) => handle,
        Err(_) => return ptr::null(),
    };
    match handle.rows.get_string(position as usize) {
        Ok(text) => {
            handle.text = owned_c_string(&text);
            handle.text.as_ptr()
        }
        Err(err) => {
            fail(out_err, err);
            ptr::null()
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_error_kind(err: *const bsl_error) -> i32 {
    if err.is_null() {
        return 0;
    }
    unsafe { (*err).kind }
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_error_message(err: *const bsl_error) -> *const c_char {
    if err.is_null() {
        return ptr::null();
    }
    unsafe { (*err).message }
}

#[unsafe(no_mangle)]
pub extern "C" fn bsl_error_free(err: *mut bsl_error) {
    if err.is_null() {
        return;
    }
    unsafe {
        let err = Box::from_raw(err);
        for text in [err.message, err.path, err.column] {
            if !text.is_null() {
                drop(CString::from_raw(text));
            }
        }
    }
}

unsafe fn copy_values(column_type: ColumnType, values: *const c_void, len: usize) -> ColumnValues {
    unsafe fn copy<T: Copy>(values: *const c_void, len: usize) -> Vec<T> {
        if len == 0 {
            return Vec::new();
        }
        unsafe { std::slice::from_raw_parts(values as *const T, len).to_vec() }
    }
    unsafe {
        match column_type {
            ColumnType::Byte => ColumnValues::Byte(copy(values, len)),
            ColumnType::UByte => ColumnValues::UByte(copy(values, len)),
            ColumnType::Short => ColumnValues::Short(copy(values, len)),
            ColumnType::UShort => ColumnValues::UShort(copy(values, len)),
            ColumnType::Int => ColumnValues::Int(copy(values, len)),
            ColumnType::UInt => ColumnValues::UInt(copy(values, len)),
            ColumnType::Long => ColumnValues::Long(copy(values, len)),
            ColumnType::ULong => ColumnValues::ULong(copy(values, len)),
            ColumnType::Float => ColumnValues::Float(copy(values, len)),
            ColumnType::Double => ColumnValues::Double(copy(values, len)),
        }
    }
}

fn qualified<T: Qualified>(
    query: *mut bsl_query,
    colname: *const c_char,
    out_len: *mut u64,
    out_err: *mut *mut bsl_error,
) -> *const T {
    let handle = match borrow_query(query, out_err) {
        Ok(handle) => handle,
        Err(_) => return ptr::null(),
    };
    let column = match read_str(colname, "colname", out_err) {
        Ok(column) => column,
        Err(_) => return ptr::null(),
    };
    match handle.query.qualified::<T>(column) {
        Ok(values) => {
            if !out_len.is_null() {
                unsafe {
                    *out_len = values.len() as u64;
                }
            }
            let data = values.as_ptr();
            handle.retrieved.push(Box::new(values));
            data
        }
        Err(err) => {
            fail(out_err, err);
            ptr::null()
        }
    }
}

fn clause(query: *mut bsl_query, pick: impl FnOnce(&bsl_query) -> &CString) -> *const c_char {
    if query.is_null() {
        return ptr::null();
    }
    let handle = unsafe { &*query };
    pick(handle).as_ptr()
}

fn write_out<T>(value: Result<T, Error>, out_value: *mut T, out_err: *mut *mut bsl_error) -> i32 {
    if out_value.is_null() {
        return fail(
            out_err,
            Error::new(ErrorKind::Usage).with_message("out_value is null"),
        );
    }
    match value {
        Ok(value) => {
            unsafe {
                *out_value = value;
            }
            0
        }
        Err(err) => fail(out_err, err),
    }
}

fn status(result: Result<(), Error>, out_err: *mut *mut bsl_error) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => fail(out_err, err),
    }
}

fn session_and_dir<'a>(
    session: *mut bsl_session,
    dir: *const c_char,
    out_err: *mut *mut bsl_error,
) -> Result<(&'a mut bsl_session, &'a str), i32> {
    let handle = borrow_session(session, out_err)?;
    let dir = read_str(dir, "dir", out_err)?;
    Ok((handle, dir))
}

fn borrow_session<'a>(
    session: *mut bsl_session,
    out_err: *mut *mut bsl_error,
) -> Result<&'a mut bsl_session, i32> {
    if session.is_null() {
        return Err(fail(
            out_err,
            Error::new(ErrorKind::Usage).with_message("session is null"),
        ));
    }
    unsafe { Ok(&mut *session) }
}

fn borrow_query<'a>(
    query: *mut bsl_query,
    out_err: *mut *mut bsl_error,
) -> Result<&'a mut bsl_query, i32> {
    if query.is_null() {
        return Err(fail(
            out_err,
            Error::new(ErrorKind::Usage).with_message("query is null"),
        ));
    }
    unsafe { Ok(&mut *query) }
}

fn borrow_result_set<'a>(
    rset: *mut bsl_result_set,
    out_err: *mut *mut bsl_error,
) -> Result<&'a mut bsl_result_set, i32> {
    if rset.is_null() {
        return Err(fail(
            out_err,
            Error::new(ErrorKind::Usage).with_message("result set is null"),
        ));
    }
    unsafe { Ok(&mut *rset) }
}

fn read_str<'a>(
    input: *const c_char,
    name: &str,
    out_err: *mut *mut bsl_error,
) -> Result<&'a str, i32> {
    if input.is_null() {
        return Err(fail(
            out_err,
            Error::new(ErrorKind::Usage).with_message(format!("{name} is null")),
        ));
    }
    unsafe { CStr::from_ptr(input) }.to_str().map_err(|_| {
        fail(
            out_err,
            Error::new(ErrorKind::Usage).with_message(format!("{name} is not valid UTF-8")),
        )
    })
}

fn read_opt_str<'a>(
    input: *const c_char,
    name: &str,
    out_err: *mut *mut bsl_error,
) -> Result<Option<&'a str>, i32> {
    if input.is_null() {
        return Ok(None);
    }
    read_str(input, name, out_err).map(Some)
}

fn fail(out_err: *mut *mut bsl_error, err: Error) -> i32 {
    tracing::debug!(error = %err, "call failed");
    if out_err.is_null() {
        return -1;
    }
    let error = Box::new(bsl_error {
        kind: to_exit_code(err.kind()),
        message: to_c_string(&err.to_string()),
        path: err
            .path()
            .map(|path| to_c_string(path.to_string_lossy().as_ref()))
            .unwrap_or(ptr::null_mut()),
        column: err.column().map(to_c_string).unwrap_or(ptr::null_mut()),
    });
    unsafe {
        *out_err = Box::into_raw(error);
    }
    -1
}

fn to_c_string(input: &str) -> *mut c_char {
    CString::new(input)
        .map(|s| s.into_raw())
        .unwrap_or(ptr::null_mut())
}

fn owned_c_string(input: &str) -> CString {
    CString::new(input.replace('\0', "")).unwrap_or_default()
}
