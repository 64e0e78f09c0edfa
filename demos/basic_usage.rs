//! # etl-datafile 使用案例
//!
//! 演示一个流水线阶段如何产出数据文件、下一阶段如何消费：
//!
//! 1. 配置写入端（环境变量覆盖 + 链式配置）
//! 2. 定义 schema，追加全局值与 profile 注解
//! 3. 写入行，关闭并取得数据句柄
//! 4. 打开读取器：列信息、顺序读取、按行号定位
//! 5. 派生一个视图容器

use etl_datafile::{
    DataReader, DataWriter, LogicalType, ProfileEntry, Result, Value, WriterOptions,
};

use chrono::{Duration, TimeZone, Utc};

fn main() -> Result<()> {
    println!("═══════════════════════════════════════════════════════════");
    println!("   etl-datafile 演示                                        ");
    println!("═══════════════════════════════════════════════════════════\n");

    // =========================================================================
    // 1. 写入端配置
    // =========================================================================
    println!("【1】写入端配置 ...");
    let opts = WriterOptions::from_env()?
        .with_index_interval(100)
        .with_memory_limit_mb(1);
    println!("    memory_limit = {} bytes, index_interval = {}\n",
        opts.memory_limit_bytes, opts.index_interval);

    // =========================================================================
    // 2. Schema
    // =========================================================================
    println!("【2】定义 schema（orders）...");
    let path = std::env::temp_dir().join("etl-datafile-orders.dat");
    let mut writer = DataWriter::create(&path, opts)?;
    writer.set_data_columns_matrix(&[
        ["OrderId",  "Long"],
        ["Customer", "String"],
        ["Amount",   "BigDecimal"],
        ["Placed",   "SqlTimestamp"],
    ])?;
    writer.set_global_value("Region", LogicalType::String, Value::String("EMEA".into()))?;
    println!("    ✓ 4 个逐行列 + 1 个全局值列\n");

    // =========================================================================
    // 3. 写入行
    // =========================================================================
    println!("【3】写入 1000 行 ...");
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).single().unwrap_or_else(Utc::now);
    let mut total_cents: i128 = 0;
    for i in 0..1000i64 {
        let cents = 1999 + (i as i128 % 50) * 100;
        total_cents += cents;
        let customer = if i % 17 == 0 { Value::Null } else { Value::String(format!("customer-{}", i % 97)) };
        writer.write_row(&[
            Value::Long(10_000 + i),
            customer,
            Value::Decimal { digits: cents, scale: 2 },
            Value::SqlTimestamp(start + Duration::minutes(i)),
        ])?;
    }
    writer.set_column_profile("Amount", vec![
        ProfileEntry::new("Sum", "BigDecimal", format!("{}.{:02}", total_cents / 100, total_cents % 100)),
    ])?;
    let handle = writer.get_data_handle()?;
    let header = handle.header();
    println!("    fingerprint    = {}", header.fingerprint);
    println!("    rows           = {}", header.row_count());
    println!("    size           = {} bytes", handle.size_bytes());
    println!("    memory backed  = {}", handle.is_memory_backed());
    if let Some(file) = handle.filename() {
        println!("    file           = {}", file.display());
    }
    println!();

    // =========================================================================
    // 4. 读取
    // =========================================================================
    println!("【4】读取 ...");
    let mut reader = DataReader::open(&handle)?;
    let names = reader.column_names()?;
    let types = reader.storage_types()?;
    for (n, t) in names.iter().zip(&types) {
        println!("    {n:<10} {t}");
    }

    let first = reader.get_data_row()?.to_vec();
    println!("    row 0   : {}", render(&first));

    reader.seek_to_row(734)?;
    println!("    row 734 : {}", render(reader.get_data_row()?));

    let nulls = {
        let mut r = DataReader::open(&handle)?;
        let mut n = 0;
        for row in r.rows() {
            if row?[1].is_null() {
                n += 1;
            }
        }
        n
    };
    println!("    Customer 为空的行数 = {nulls}\n");

    // =========================================================================
    // 5. 视图
    // =========================================================================
    println!("【5】派生视图容器 ...");
    let source_fp = header.fingerprint_uuid()?;
    let mut view = DataWriter::in_memory(
        WriterOptions::default().view_of(&path, source_fp),
    )?;
    view.set_data_columns(&["OrderId"], &[LogicalType::Long])?;
    view.write_row(&[Value::Long(10_734)])?;
    let view_handle = view.get_data_handle()?;
    println!("    kind = {:?}, source = {}, fingerprint 相同 = {}",
        view_handle.header().file_kind,
        view_handle.header().source_filename,
        view_handle.header().fingerprint == header.fingerprint);

    if let Some(file) = handle.filename() {
        std::fs::remove_file(file)?;
    }
    println!("\n✓ 完成");
    Ok(())
}

fn render(row: &[Value]) -> String {
    row.iter().map(Value::to_string).collect::<Vec<_>>().join(" | ")
}
